use crate::error::{Error, Result};
use camino::Utf8Path;
use std::process::{Command, Stdio};
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Disk formats understood by `qemu-img`.
#[derive(Debug, PartialEq, Eq, Clone, Copy, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum DiskFormat {
    Raw,
    Qcow2,
}

/// Translates a disk image between formats.
pub(crate) trait Converter {
    fn convert(
        &self,
        from: DiskFormat,
        to: DiskFormat,
        src: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<()>;
}

/// Conversion via an external `qemu-img` binary.
#[derive(Debug, Clone)]
pub(crate) struct QemuImg {
    binary: String,
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

impl QemuImg {
    pub(crate) fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Converter for QemuImg {
    fn convert(
        &self,
        from: DiskFormat,
        to: DiskFormat,
        src: &Utf8Path,
        dest: &Utf8Path,
    ) -> Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        debug!("{} convert -f {} -O {} {} {}", self.binary, from, to, src, dest);
        let s = Command::new(&self.binary)
            .args(&["convert", "-q", "-f", from.as_str(), "-O", to.as_str()])
            .args(&[src.as_str(), dest.as_str()])
            .stdout(Stdio::null())
            .output()
            .map_err(Error::ConversionSpawn)?;
        if !s.status.success() {
            return Err(Error::Conversion {
                status: s.status,
                stderr: String::from_utf8_lossy(&s.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
