//! The published artifact is a gzip-compressed tarball of the qcow2 disk
//! and its metadata, both stored without any directory prefix.

use crate::error::{Error, Result};
use camino::Utf8Path;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

/// Write `members` in order to a new `.tar.gz` at `dest`; each entry is
/// named by the member's file name only.
pub(crate) fn create_tar_gz(dest: &Utf8Path, members: &[&Utf8Path]) -> Result<()> {
    let archive_err = |source| Error::Archive {
        path: dest.to_string(),
        source,
    };
    let out = BufWriter::new(File::create(dest).map_err(archive_err)?);
    let mut builder = tar::Builder::new(GzEncoder::new(out, Compression::default()));
    for &member in members {
        let name = member.file_name().ok_or_else(|| Error::Archive {
            path: dest.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("member without a file name: {}", member),
            ),
        })?;
        let mut f = File::open(member).map_err(archive_err)?;
        builder.append_file(name, &mut f).map_err(archive_err)?;
    }
    let gz = builder.into_inner().map_err(archive_err)?;
    let mut out = gz.finish().map_err(archive_err)?;
    out.flush().map_err(archive_err)?;
    Ok(())
}

/// Entry names of a `.tar.gz`, in archive order.
pub(crate) fn list_tar_gz(src: &Utf8Path) -> Result<Vec<String>> {
    let archive_err = |source| Error::Archive {
        path: src.to_string(),
        source,
    };
    let r = BufReader::new(File::open(src).map_err(archive_err)?);
    let mut r = tar::Archive::new(flate2::read::GzDecoder::new(r));
    let mut names = Vec::new();
    for ent in r.entries().map_err(archive_err)? {
        let ent = ent.map_err(archive_err)?;
        let name = ent.path().map_err(archive_err)?;
        names.push(name.to_string_lossy().into_owned());
    }
    Ok(names)
}
