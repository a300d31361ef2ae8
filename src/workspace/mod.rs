//! Staging workspace for a single pipeline run.
//!
//! Layout under the workspace root:
//!
//! ```text
//! <root>/
//!     staging/     APK contents being reassembled
//!     decoded/     classes extracted from the dex2jar output
//!     tmp/code/    decoded classes plus compiled recipe classes
//!     tmp/woven/   weaver output (plus libs/aspectjrt.jar)
//!     tmp/dex/     re-assembled classes.dex
//!     output/      final artifact only
//! ```
//!
//! The tree is wiped at the start of a run and never cleaned up afterwards,
//! so a failed run can be inspected in place.

pub mod archive;
pub mod files;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

pub use archive::{extract_archive_into, package_into};
pub use files::{copy_tree, has_files, merge_tree, replace_file};

/// Subdirectories created by [`Workspace::reset`], relative to the root.
pub const LAYOUT: &[&str] = &[
    "staging",
    "decoded",
    "tmp/code",
    "tmp/woven",
    "tmp/dex",
    "output",
];

/// A reset workspace root. Exclusively owned by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Delete `root` if it exists, then create the fixed layout.
    pub fn reset(root: &Path) -> Result<Self> {
        if root.exists() {
            fs::remove_dir_all(root).map_err(|e| {
                PipelineError::io(
                    format!("removing existing workspace '{}'", root.display()),
                    e,
                )
            })?;
        }
        for dir in LAYOUT {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| {
                PipelineError::io(format!("creating '{}'", path.display()), e)
            })?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Refer to an existing workspace without touching the disk.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn decoded(&self) -> PathBuf {
        self.root.join("decoded")
    }

    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn code(&self) -> PathBuf {
        self.tmp().join("code")
    }

    pub fn woven(&self) -> PathBuf {
        self.tmp().join("woven")
    }

    pub fn dex(&self) -> PathBuf {
        self.tmp().join("dex")
    }

    pub fn output(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Intermediate jar written by dex2jar.
    pub fn decoded_jar(&self) -> PathBuf {
        self.tmp().join("decoded.jar")
    }

    /// Re-assembled dex written by dx.
    pub fn dex_file(&self) -> PathBuf {
        self.dex().join("classes.dex")
    }

    /// Staging contents packaged but not yet signed.
    pub fn unsigned_apk(&self) -> PathBuf {
        self.tmp().join("app_unsigned.apk")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing(root: &Path) -> Vec<PathBuf> {
        let mut entries = walkdir::WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| e.unwrap().path().strip_prefix(root).unwrap().to_path_buf())
            .collect::<Vec<_>>();
        entries.sort();
        entries
    }

    #[test]
    fn test_reset_creates_layout() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::reset(&temp.path().join("build")).unwrap();

        for dir in LAYOUT {
            assert!(ws.root().join(dir).is_dir(), "{} should exist", dir);
        }
        assert_eq!(ws.code(), ws.root().join("tmp/code"));
    }

    #[test]
    fn test_reset_wipes_previous_contents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("build");
        let ws = Workspace::reset(&root).unwrap();
        fs::write(ws.staging().join("classes.dex"), "old").unwrap();
        fs::create_dir_all(root.join("leftover/nested")).unwrap();

        let ws = Workspace::reset(&root).unwrap();
        assert!(!ws.staging().join("classes.dex").exists());
        assert!(!root.join("leftover").exists());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("build");

        Workspace::reset(&root).unwrap();
        let first = listing(&root);
        Workspace::reset(&root).unwrap();
        let second = listing(&root);

        assert_eq!(first, second);
    }
}
