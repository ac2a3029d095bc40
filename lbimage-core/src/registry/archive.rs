//! Local tarball extraction
//!
//! Each tarball is unpacked into its own `extract-<uuid>` directory under the
//! work directory so concurrent leftovers never collide. A failed extraction
//! removes its directory; after a successful one, cleanup removes it.

use flate2::read::GzDecoder;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::RegistryError;

const EXTRACT_DIR_PREFIX: &str = "extract-";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Fresh extraction directory under `work_dir`
pub fn extraction_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(format!("{EXTRACT_DIR_PREFIX}{}", Uuid::now_v7()))
}

/// Unpack a gzipped tarball into `dest` and return the image file inside it
///
/// `dest` is removed again if extraction fails.
pub fn extract_image(tarball: &Path, dest: &Path) -> Result<PathBuf, RegistryError> {
    let file = File::open(tarball).map_err(io_error(tarball))?;
    std::fs::create_dir_all(dest).map_err(io_error(dest))?;

    let result = unpack_image(file, tarball, dest);
    if result.is_err() {
        discard_extraction(dest);
    }
    result
}

fn unpack_image(file: File, tarball: &Path, dest: &Path) -> Result<PathBuf, RegistryError> {
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    archive.unpack(dest).map_err(|e| RegistryError::Archive {
        path: tarball.to_path_buf(),
        reason: e.to_string(),
    })?;

    let image = find_image_file(dest).ok_or_else(|| RegistryError::Archive {
        path: tarball.to_path_buf(),
        reason: "no image file found in archive".to_string(),
    })?;

    debug!("Extracted {} to {}", tarball.display(), image.display());
    Ok(image)
}

/// Best-effort removal of an extraction directory nobody will use
pub fn discard_extraction(dest: &Path) {
    match std::fs::remove_dir_all(dest) {
        Ok(()) => debug!("Discarded extraction directory {}", dest.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove extraction directory {}: {}",
            dest.display(),
            e
        ),
    }
}

/// The first `*.img` file, or the only regular file
fn find_image_file(dir: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    if let Some(image) = files
        .iter()
        .find(|path| path.extension().is_some_and(|ext| ext == "img"))
    {
        return Some(image.clone());
    }

    if files.len() == 1 {
        files.pop()
    } else {
        None
    }
}

/// Delete an extracted image file and the extraction directory holding it
///
/// The extraction directory is the `extract-*` entry directly under
/// `work_dir`, whatever directories the tarball itself contained.
pub fn remove_extracted(path: &Path, work_dir: &Path) -> Result<(), RegistryError> {
    let extraction_root = path.ancestors().skip(1).find(|dir| {
        dir.parent() == Some(work_dir)
            && dir
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(EXTRACT_DIR_PREFIX))
    });

    match extraction_root {
        Some(root) => {
            std::fs::remove_dir_all(root).map_err(io_error(root))?;
            debug!("Removed extraction directory {}", root.display());
        }
        None => std::fs::remove_file(path).map_err(io_error(path))?,
    }

    Ok(())
}
