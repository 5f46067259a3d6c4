//! Fetch, decompress, convert and package a disk image into a single
//! publishable archive.

use crate::archive;
use crate::download::Fetcher;
use crate::error::{Error, Result};
use crate::metadata::{self, ImageMetadata};
use crate::qemu_img::{Converter, DiskFormat};
use crate::source::{ImageSource, METADATA_FILENAME};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use tracing::{debug, info, warn};

/// A scratch directory owned by a single pipeline run.  It and everything
/// in it is removed when this is dropped.
pub(crate) struct Workspace {
    dir: tempfile::TempDir,
    path: Utf8PathBuf,
}

impl Workspace {
    pub(crate) fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("talos-image-")
            .tempdir()?;
        let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).map_err(|p| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("non-UTF-8 temporary directory {:?}", p),
            )
        })?;
        Ok(Self { dir, path })
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Remove the directory now, reporting failures instead of ignoring them.
    pub(crate) fn close(self) -> Result<()> {
        self.dir.close()?;
        Ok(())
    }
}

/// Run `f` with a fresh [`Workspace`], removing it however `f` returns.
pub(crate) fn with_workspace<T>(f: impl FnOnce(&Utf8Path) -> Result<T>) -> Result<T> {
    let ws = Workspace::new()?;
    debug!("Using workspace {}", ws.path());
    // On error the workspace is dropped, which removes it
    let v = f(ws.path())?;
    let path = ws.path().to_owned();
    if let Err(e) = ws.close() {
        warn!("Failed to remove workspace {}: {}", path, e);
    }
    Ok(v)
}

/// Decompress a single xz stream from `src` into `dest`.  Anything after
/// the end of the first stream is rejected.
pub(crate) fn decompress_xz(src: &Utf8Path, dest: &Utf8Path) -> Result<u64> {
    let format_err = |reason: String| Error::Format {
        path: src.to_string(),
        reason,
    };
    let input = BufReader::new(File::open(src)?);
    let mut decoder = xz2::bufread::XzDecoder::new(input);
    let mut out = BufWriter::new(File::create(dest)?);
    let size = std::io::copy(&mut decoder, &mut out).map_err(|e| format_err(e.to_string()))?;
    out.flush()?;
    let mut rest = decoder.into_inner();
    if !rest.fill_buf()?.is_empty() {
        return Err(format_err("trailing data after xz stream".to_string()));
    }
    Ok(size)
}

/// Produce `<stem>.oci` in `dir` holding the qcow2 image and its
/// metadata, and return its path.
pub(crate) fn transcode(
    source: &ImageSource,
    fetcher: &dyn Fetcher,
    converter: &dyn Converter,
    dir: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let compressed = dir.join(source.compressed_filename());
    info!("Fetching {}", source.url());
    fetcher.fetch(source.url(), &compressed)?;

    info!("Decompressing");
    let raw = dir.join(source.raw_filename());
    let size = decompress_xz(&compressed, &raw)?;
    info!("Decompressed: {}", indicatif::HumanBytes(size));

    info!("Converting");
    let qcow2 = dir.join(source.qcow2_filename());
    converter.convert(DiskFormat::Raw, DiskFormat::Qcow2, &raw, &qcow2)?;

    let meta_path = dir.join(METADATA_FILENAME);
    metadata::write_metadata(&ImageMetadata::for_version(source.version()), &meta_path)?;

    info!("Packaging");
    let archive_path = dir.join(source.archive_filename());
    archive::create_tar_gz(&archive_path, &[qcow2.as_path(), meta_path.as_path()])?;
    Ok(archive_path)
}
