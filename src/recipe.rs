//! Recipe directories: what gets injected into the APK.
//!
//! ```text
//! <recipe>/
//!     source/      Java sources compiled into the app (may be empty)
//!     aspects/     AspectJ aspects woven into the app (may be empty)
//!     libraries/   files merged into the APK's lib/ directory
//! ```

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::workspace::has_files;

pub const SOURCE_DIR: &str = "source";
pub const ASPECTS_DIR: &str = "aspects";
pub const LIBRARIES_DIR: &str = "libraries";

/// A validated, read-only recipe directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    root: PathBuf,
}

impl Recipe {
    /// Open `root` and check that all three subdirectories are present.
    pub fn open(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::InvalidRecipe {
                recipe: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let missing = [SOURCE_DIR, ASPECTS_DIR, LIBRARIES_DIR]
            .into_iter()
            .filter(|dir| !root.join(dir).is_dir())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(PipelineError::InvalidRecipe {
                recipe: root.to_path_buf(),
                reason: format!("missing subdirectories: {}", missing.join(", ")),
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn aspects(&self) -> PathBuf {
        self.root.join(ASPECTS_DIR)
    }

    pub fn libraries(&self) -> PathBuf {
        self.root.join(LIBRARIES_DIR)
    }

    /// Whether the recipe ships any custom code to compile.
    pub fn has_sources(&self) -> bool {
        has_files(&self.source())
    }

    /// Every `.java` file under `source/`, sorted.
    pub fn java_sources(&self) -> Vec<PathBuf> {
        let mut files = WalkDir::new(self.source())
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "java"))
            .collect::<Vec<_>>();
        files.sort();
        files
    }
}
