use std::process::ExitStatus;

use thiserror::Error;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of the image pipeline and the object-storage calls.
///
/// Every stage fails fast; nothing here is retried.
#[derive(Error, Debug)]
pub(crate) enum Error {
    #[error("no version token matching /v<digits>/ in {0}")]
    UrlPattern(String),

    #[error("failed to download {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("building HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid xz input {path}: {reason}")]
    Format { path: String, reason: String },

    #[error("qemu-img could not be run: {0}")]
    ConversionSpawn(#[source] std::io::Error),

    #[error("qemu-img failed ({status}): {stderr}")]
    Conversion { status: ExitStatus, stderr: String },

    #[error("serializing image metadata: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("building archive {path}: {source}")]
    Archive {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {object} failed: {reason}")]
    Upload { object: String, reason: String },

    #[error("delete of {object} failed: {reason}")]
    Delete { object: String, reason: String },

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("malformed chat event: {0}")]
    Event(String),

    #[error("language model request failed: {0}")]
    Model(String),

    #[error("unrecognized classification {response:?}: {reason}")]
    Classification { response: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
