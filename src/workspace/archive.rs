//! Zip extraction and packaging for APK and jar archives.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::{PipelineError, Result};

/// Signature directory removed after extraction; the package gets re-signed.
pub const SIGNATURE_DIR: &str = "META-INF";

/// Extract every entry of `archive` into `dest`, then drop `dest/META-INF`.
///
/// Entries whose names would land outside `dest` are rejected.
pub fn extract_archive_into(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).map_err(|e| PipelineError::corrupt(archive, e))?;
    let mut zip =
        ZipArchive::new(BufReader::new(file)).map_err(|e| PipelineError::corrupt(archive, e))?;

    fs::create_dir_all(dest)
        .map_err(|e| PipelineError::io(format!("creating '{}'", dest.display()), e))?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| PipelineError::corrupt(archive, e))?;
        let rel = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            PipelineError::corrupt(
                archive,
                format!("entry '{}' escapes the extraction root", entry.name()),
            )
        })?;
        let target = dest.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| {
                PipelineError::corrupt(archive, format!("creating '{}': {}", target.display(), e))
            })?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PipelineError::corrupt(archive, format!("creating '{}': {}", parent.display(), e))
            })?;
        }
        let mut out = File::create(&target).map_err(|e| {
            PipelineError::corrupt(archive, format!("writing '{}': {}", target.display(), e))
        })?;
        io::copy(&mut entry, &mut out).map_err(|e| {
            PipelineError::corrupt(archive, format!("writing '{}': {}", target.display(), e))
        })?;
    }

    let signature = dest.join(SIGNATURE_DIR);
    if signature.is_dir() {
        fs::remove_dir_all(&signature).map_err(|e| {
            PipelineError::io(format!("removing '{}'", signature.display()), e)
        })?;
    }

    Ok(())
}

/// Write the tree under `source_dir` into a new zip at `archive`.
///
/// Pre-order walk, directories before their contents, siblings sorted by
/// name. Timestamps are pinned so identical trees give identical archives.
pub fn package_into(source_dir: &Path, archive: &Path) -> Result<()> {
    if !source_dir.is_dir() {
        return Err(PipelineError::NotFound {
            what: "packaging source".to_string(),
            path: source_dir.to_path_buf(),
        });
    }
    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::io(format!("creating '{}'", parent.display()), e))?;
    }

    let file = File::create(archive)
        .map_err(|e| PipelineError::io(format!("creating '{}'", archive.display()), e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            PipelineError::io(format!("walking '{}'", source_dir.display()), e.into())
        })?;
        let name = entry_name(source_dir, entry.path())?;

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)
                .map_err(|e| PipelineError::corrupt(archive, e))?;
            continue;
        }

        zip.start_file(name, options)
            .map_err(|e| PipelineError::corrupt(archive, e))?;
        let mut input = File::open(entry.path())
            .map_err(|e| PipelineError::io(format!("opening '{}'", entry.path().display()), e))?;
        io::copy(&mut input, &mut zip)
            .map_err(|e| PipelineError::io(format!("packing '{}'", entry.path().display()), e))?;
    }

    zip.finish()
        .map_err(|e| PipelineError::corrupt(archive, e))?;
    Ok(())
}

/// Archive entry name: relative path with `/` separators.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|e| {
        PipelineError::io(
            "relativizing walked path",
            io::Error::new(io::ErrorKind::Other, e),
        )
    })?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    Ok(parts.join("/"))
}
