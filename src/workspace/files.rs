//! Tree copy, overlay merge and file replacement inside the workspace.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{PipelineError, Result};

/// Recursively copy `src` into `dst`, creating `dst` if needed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(PipelineError::NotFound {
            what: "directory".to_string(),
            path: src.to_path_buf(),
        });
    }
    overlay(src, dst)
}

/// Overlay `src` onto `dst`. Files at matching relative paths are overwritten.
///
/// A missing `src` is treated as empty.
pub fn merge_tree(src: &Path, dst: &Path) -> Result<()> {
    if !src.exists() {
        return Ok(());
    }
    overlay(src, dst)
}

/// Symlinks are followed: the link's target contents land in `dst` as a
/// regular file, so relative links that point outside `src` still resolve.
fn overlay(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .map_err(|e| PipelineError::io(format!("creating '{}'", dst.display()), e))?;

    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            PipelineError::io(format!("walking '{}'", src.display()), e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| {
                PipelineError::io(
                    "relativizing walked path",
                    std::io::Error::new(std::io::ErrorKind::Other, e),
                )
            })?;
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| PipelineError::io(format!("creating '{}'", target.display()), e))?;
            continue;
        }
        if target.is_symlink() {
            fs::remove_file(&target)
                .map_err(|e| PipelineError::io(format!("removing '{}'", target.display()), e))?;
        }
        fs::copy(entry.path(), &target).map_err(|e| {
            PipelineError::io(
                format!(
                    "copying '{}' -> '{}'",
                    entry.path().display(),
                    target.display()
                ),
                e,
            )
        })?;
    }

    Ok(())
}

/// Replace `dst` with a copy of `src`.
///
/// The copy lands in a sibling temp file first and is renamed over `dst`,
/// so `dst` is never observed missing or half-written.
pub fn replace_file(src: &Path, dst: &Path) -> Result<()> {
    let parent = dst.parent().ok_or_else(|| PipelineError::NotFound {
        what: "parent directory".to_string(),
        path: dst.to_path_buf(),
    })?;
    fs::create_dir_all(parent)
        .map_err(|e| PipelineError::io(format!("creating '{}'", parent.display()), e))?;

    let file_name = dst
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.tmp-{}", file_name, std::process::id()));

    fs::copy(src, &tmp).map_err(|e| {
        PipelineError::io(
            format!("copying '{}' -> '{}'", src.display(), tmp.display()),
            e,
        )
    })?;
    fs::rename(&tmp, dst).map_err(|e| {
        PipelineError::io(
            format!("renaming '{}' -> '{}'", tmp.display(), dst.display()),
            e,
        )
    })
}

/// Whether `dir` contains at least one regular file at any depth.
pub fn has_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}
