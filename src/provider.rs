//! The create/diff/delete contract an orchestration engine drives to manage
//! the uploaded image as a custom resource.

use crate::download::Fetcher;
use crate::error::Result;
use crate::object_storage::{Credentials, ObjectHandle, StoreConnector};
use crate::pipeline;
use crate::qemu_img::Converter;
use crate::source::ImageSource;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

/// The name every upload is stored under.
pub(crate) const OBJECT_NAME: &str = "talos-image.oci";
/// The only property whose change requires rerunning the pipeline.
pub(crate) const DOWNLOAD_URL: &str = "download_url";

/// Resource inputs, and (with `object_name` filled in) its outputs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Properties {
    pub(crate) download_url: String,
    pub(crate) namespace: String,
    pub(crate) bucket: String,
    /// Empty until `create` has run.
    #[serde(default)]
    pub(crate) object_name: String,
    pub(crate) user_ocid: String,
    pub(crate) fingerprint: String,
    pub(crate) tenancy_ocid: String,
    pub(crate) region: String,
    pub(crate) private_key: String,
    /// Anything else we were handed is passed through untouched.
    #[serde(flatten)]
    pub(crate) extra: BTreeMap<String, Value>,
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Properties")
            .field("download_url", &self.download_url)
            .field("namespace", &self.namespace)
            .field("bucket", &self.bucket)
            .field("object_name", &self.object_name)
            .field("credentials", &self.credentials())
            .field("extra", &self.extra)
            .finish()
    }
}

impl Properties {
    pub(crate) fn credentials(&self) -> Credentials {
        Credentials {
            user_ocid: self.user_ocid.clone(),
            fingerprint: self.fingerprint.clone(),
            tenancy_ocid: self.tenancy_ocid.clone(),
            region: self.region.clone(),
            private_key: self.private_key.clone(),
        }
    }

    pub(crate) fn handle(&self, object: &str) -> ObjectHandle {
        ObjectHandle {
            namespace: self.namespace.clone(),
            bucket: self.bucket.clone(),
            object: object.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct CreateResult {
    pub(crate) id: String,
    pub(crate) outs: Properties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct DiffResult {
    pub(crate) changes: bool,
    /// Properties whose change forces delete-and-recreate.
    #[serde(default)]
    pub(crate) replaces: Vec<String>,
}

impl DiffResult {
    pub(crate) fn unchanged() -> Self {
        Self {
            changes: false,
            replaces: Vec::new(),
        }
    }

    pub(crate) fn replace(field: &str) -> Self {
        Self {
            changes: true,
            replaces: vec![field.to_string()],
        }
    }
}

/// Manages an uploaded image.  All collaborators are borrowed so a single
/// HTTP client and tool configuration serve every operation.
pub(crate) struct ImageProvider<'a> {
    fetcher: &'a dyn Fetcher,
    converter: &'a dyn Converter,
    connector: &'a dyn StoreConnector,
}

impl<'a> ImageProvider<'a> {
    pub(crate) fn new(
        fetcher: &'a dyn Fetcher,
        converter: &'a dyn Converter,
        connector: &'a dyn StoreConnector,
    ) -> Self {
        Self {
            fetcher,
            converter,
            connector,
        }
    }

    /// Build the image archive in a scratch workspace and upload it.
    pub(crate) fn create(&self, props: &Properties) -> Result<CreateResult> {
        let source = ImageSource::new(props.download_url.as_str())?;
        let store = self.connector.connect(&props.credentials())?;
        let handle = props.handle(OBJECT_NAME);
        info!("Creating {} from version {}", handle, source.version());
        pipeline::with_workspace(|dir| {
            let archive = pipeline::transcode(&source, self.fetcher, self.converter, dir)?;
            store.put_object(&handle, &archive)
        })?;
        let mut outs = props.clone();
        outs.object_name = OBJECT_NAME.to_string();
        Ok(CreateResult {
            id: OBJECT_NAME.to_string(),
            outs,
        })
    }

    /// Only a new download URL matters; it always forces replacement.
    pub(crate) fn diff(&self, _id: &str, olds: &Value, news: &Value) -> DiffResult {
        diff(olds, news)
    }

    /// Remove the object recorded in `props`.
    pub(crate) fn delete(&self, _id: &str, props: &Properties) -> Result<()> {
        let store = self.connector.connect(&props.credentials())?;
        let handle = props.handle(&props.object_name);
        info!("Deleting {}", handle);
        store.delete_object(&handle)
    }
}

/// Compares raw property documents, so either side may be missing fields.
pub(crate) fn diff(olds: &Value, news: &Value) -> DiffResult {
    if olds.get(DOWNLOAD_URL) == news.get(DOWNLOAD_URL) {
        DiffResult::unchanged()
    } else {
        DiffResult::replace(DOWNLOAD_URL)
    }
}
