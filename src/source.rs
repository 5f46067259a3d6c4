//! The identity of the image we publish: where it is downloaded from, and
//! the version embedded in that location.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Name of the metadata member inside the published archive.
pub(crate) const METADATA_FILENAME: &str = "image_metadata.json";

/// The pattern is constant, so compiling it cannot fail at runtime.
static VERSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v([\d.]+)/").expect("static regex"));

/// A download URL and the version token parsed out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageSource {
    url: String,
    version: String,
    stem: String,
}

impl ImageSource {
    /// Parse `url`; the version is the `1.11.5` in `.../v1.11.5/...`.
    pub(crate) fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let version = VERSION_TOKEN
            .captures(&url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| Error::UrlPattern(url.clone()))?;
        let stem = artifact_stem(&url);
        Ok(Self { url, version, stem })
    }

    pub(crate) fn url(&self) -> &str {
        self.url.as_str()
    }

    pub(crate) fn version(&self) -> &str {
        self.version.as_str()
    }

    /// The compressed file as downloaded.
    pub(crate) fn compressed_filename(&self) -> String {
        format!("{}.raw.xz", self.stem)
    }

    pub(crate) fn raw_filename(&self) -> String {
        format!("{}.raw", self.stem)
    }

    pub(crate) fn qcow2_filename(&self) -> String {
        format!("{}.qcow2", self.stem)
    }

    /// The tarball that gets uploaded.
    pub(crate) fn archive_filename(&self) -> String {
        format!("{}.oci", self.stem)
    }
}

/// Last path segment without query, `.xz` and `.raw` suffixes.
fn artifact_stem(url: &str) -> String {
    let path = url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url);
    let name = path.rsplit('/').next().unwrap_or_default();
    let name = name.strip_suffix(".xz").unwrap_or(name);
    let name = name.strip_suffix(".raw").unwrap_or(name);
    if name.is_empty() {
        "image".to_string()
    } else {
        name.to_string()
    }
}
