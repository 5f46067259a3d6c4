//! Put and delete objects in an OCI object-storage bucket.

use crate::error::{Error, Result};
use crate::signer::{self, RequestSigner};
use camino::Utf8Path;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, DATE};
use reqwest::{Method, Url};
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use tracing::{debug, info};

/// Identifies an object: `/n/{namespace}/b/{bucket}/o/{object}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ObjectHandle {
    pub(crate) namespace: String,
    pub(crate) bucket: String,
    pub(crate) object: String,
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.bucket, self.object)
    }
}

/// API signing credentials for a user.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) user_ocid: String,
    pub(crate) fingerprint: String,
    pub(crate) tenancy_ocid: String,
    pub(crate) region: String,
    /// PEM-encoded RSA key.
    pub(crate) private_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_ocid", &self.user_ocid)
            .field("fingerprint", &self.fingerprint)
            .field("tenancy_ocid", &self.tenancy_ocid)
            .field("region", &self.region)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

pub(crate) trait ObjectStore {
    /// Upload the contents of `src` as a single request.
    fn put_object(&self, handle: &ObjectHandle, src: &Utf8Path) -> Result<()>;
    fn delete_object(&self, handle: &ObjectHandle) -> Result<()>;
}

/// Builds an [`ObjectStore`] client from credentials.
pub(crate) trait StoreConnector {
    fn connect(&self, creds: &Credentials) -> Result<Box<dyn ObjectStore>>;
}

/// Connects to the public OCI endpoint of the credentials' region.
#[derive(Debug, Default)]
pub(crate) struct OciConnector;

impl StoreConnector for OciConnector {
    fn connect(&self, creds: &Credentials) -> Result<Box<dyn ObjectStore>> {
        Ok(Box::new(OciObjectStorage::new(creds)?))
    }
}

#[derive(Debug)]
pub(crate) struct OciObjectStorage {
    client: Client,
    endpoint: Url,
    signer: RequestSigner,
}

impl OciObjectStorage {
    pub(crate) fn new(creds: &Credentials) -> Result<Self> {
        let endpoint = format!("https://objectstorage.{}.oraclecloud.com", creds.region);
        Self::with_endpoint(creds, &endpoint)
    }

    pub(crate) fn with_endpoint(creds: &Credentials, endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::Credentials(format!("invalid endpoint {}: {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() || endpoint.host_str().is_none() {
            return Err(Error::Credentials(format!("invalid endpoint {}", endpoint)));
        }
        let client = crate::download::new_http_client()?;
        let signer = RequestSigner::new(creds)?;
        debug!("Signing requests to {} as {}", endpoint, signer.key_id());
        Ok(Self {
            client,
            endpoint,
            signer,
        })
    }

    fn object_url(&self, handle: &ObjectHandle) -> Url {
        let mut url = self.endpoint.clone();
        // Checked to be a base URL at construction
        if let Ok(mut segs) = url.path_segments_mut() {
            segs.pop_if_empty().extend(&[
                "n",
                handle.namespace.as_str(),
                "b",
                handle.bucket.as_str(),
                "o",
                handle.object.as_str(),
            ]);
        }
        url
    }

    /// Start a request carrying the `date` and `authorization` headers.
    fn signed(&self, method: Method, url: &Url) -> RequestBuilder {
        let date = signer::http_date(chrono::Utc::now());
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => String::new(),
        };
        let target = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        let auth = self
            .signer
            .authorization(method.as_str(), &target, &host, &date);
        debug!("{} {}", method, url);
        self.client
            .request(method, url.clone())
            .header(DATE, date)
            .header(AUTHORIZATION, auth)
    }
}

/// Non-2xx responses become an error string with the status and body.
fn check_response(resp: reqwest::Result<Response>) -> std::result::Result<(), String> {
    let resp = resp.map_err(|e| e.to_string())?;
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().unwrap_or_default();
    Err(format!("{}: {}", status, body.trim()))
}

impl ObjectStore for OciObjectStorage {
    fn put_object(&self, handle: &ObjectHandle, src: &Utf8Path) -> Result<()> {
        let f = File::open(src)?;
        let len = f.metadata()?.len();
        let url = self.object_url(handle);
        info!("Uploading {} to {}", indicatif::HumanBytes(len), handle);
        let resp = self
            .signed(Method::PUT, &url)
            .body(Body::sized(f, len))
            .send();
        check_response(resp).map_err(|reason| Error::Upload {
            object: handle.to_string(),
            reason,
        })
    }

    fn delete_object(&self, handle: &ObjectHandle) -> Result<()> {
        let url = self.object_url(handle);
        info!("Deleting {}", handle);
        let resp = self.signed(Method::DELETE, &url).send();
        check_response(resp).map_err(|reason| Error::Delete {
            object: handle.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::tests::{test_credentials, test_key};
    use httpmock::prelude::*;

    fn handle() -> ObjectHandle {
        ObjectHandle {
            namespace: "axaxnpcrorw5".to_string(),
            bucket: "os_images".to_string(),
            object: "talos-image.oci".to_string(),
        }
    }

    #[test]
    fn test_object_url() {
        let creds = test_credentials(&test_key());
        let store = OciObjectStorage::new(&creds).unwrap();
        assert_eq!(
            store.object_url(&handle()).as_str(),
            "https://objectstorage.us-sanjose-1.oraclecloud.com/n/axaxnpcrorw5/b/os_images/o/talos-image.oci"
        );
        let mut h = handle();
        h.object = "a b/c".to_string();
        assert_eq!(
            store.object_url(&h).path(),
            "/n/axaxnpcrorw5/b/os_images/o/a%20b%2Fc"
        );
    }

    #[test]
    fn test_put_and_delete() {
        let server = MockServer::start();
        let put = server.mock(|when, then| {
            when.method(PUT)
                .path("/n/axaxnpcrorw5/b/os_images/o/talos-image.oci")
                .header_exists("authorization")
                .header_exists("date")
                .header(
                    "user-agent",
                    concat!("talos-image-provider/", env!("CARGO_PKG_VERSION")),
                )
                .body("archive bytes");
            then.status(200);
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE)
                .path("/n/axaxnpcrorw5/b/os_images/o/talos-image.oci")
                .header_exists("authorization");
            then.status(204);
        });

        let creds = test_credentials(&test_key());
        let store = OciObjectStorage::with_endpoint(&creds, &server.base_url()).unwrap();
        let td = tempfile::tempdir().unwrap();
        let src = Utf8Path::from_path(td.path()).unwrap().join("x.oci");
        std::fs::write(&src, b"archive bytes").unwrap();

        store.put_object(&handle(), &src).unwrap();
        store.delete_object(&handle()).unwrap();
        put.assert_hits(1);
        delete.assert_hits(1);
    }

    #[test]
    fn test_errors_carry_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(DELETE);
            then.status(404).body("ObjectNotFound");
        });
        server.mock(|when, then| {
            when.method(PUT);
            then.status(401).body("NotAuthenticated");
        });
        let creds = test_credentials(&test_key());
        let store = OciObjectStorage::with_endpoint(&creds, &server.base_url()).unwrap();

        match store.delete_object(&handle()) {
            Err(Error::Delete { object, reason }) => {
                assert_eq!(object, "axaxnpcrorw5/os_images/talos-image.oci");
                assert!(reason.starts_with("404"), "{}", reason);
                assert!(reason.contains("ObjectNotFound"));
            }
            o => panic!("unexpected {:?}", o),
        }

        let td = tempfile::tempdir().unwrap();
        let src = Utf8Path::from_path(td.path()).unwrap().join("x.oci");
        std::fs::write(&src, b"x").unwrap();
        assert!(matches!(
            store.put_object(&handle(), &src),
            Err(Error::Upload { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let creds = test_credentials(&test_key());
        let s = format!("{:?}", creds);
        assert!(s.contains("<redacted>"));
        assert!(!s.contains("PRIVATE KEY"));
    }
}
