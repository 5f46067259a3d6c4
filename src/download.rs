use crate::error::{Error, Result};
use camino::Utf8Path;
use std::fs::File;
use std::io::Write;
use tracing::{debug, info};

/// Retrieves a remote file to a local path.
pub(crate) trait Fetcher {
    /// Download `url` into `dest`, returning the number of bytes written.
    fn fetch(&self, url: &str, dest: &Utf8Path) -> Result<u64>;
}

/// A blocking HTTP client identifying itself as this tool.
pub(crate) fn new_http_client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::ClientBuilder::new()
        .user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION"),
        ))
        // The blocking client otherwise gives up after 30 seconds.
        .timeout(None::<std::time::Duration>)
        .build()
        .map_err(Error::HttpClient)
}

impl Fetcher for reqwest::blocking::Client {
    fn fetch(&self, url: &str, dest: &Utf8Path) -> Result<u64> {
        let transport = |source| Error::Transport {
            url: url.to_string(),
            source,
        };
        let temp_name = format!("{}.tmp", dest);
        debug!("GET {} -> {}", url, temp_name);
        let mut resp = self
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(transport)?;
        let mut out = std::io::BufWriter::new(File::create(&temp_name)?);
        let size = resp.copy_to(&mut out).map_err(transport)?;
        out.flush()?;
        drop(out);
        std::fs::rename(&temp_name, dest)?;
        info!("Downloaded: {} ({})", dest, indicatif::HumanBytes(size));
        Ok(size)
    }
}
