//! Error taxonomy for pipeline runs.
//!
//! Nothing here is retried. Every variant is fatal for the run that produced
//! it, and the workspace is left on disk as-is for inspection.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::stages::Stage;

/// External tools the pipeline knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// `d2j-dex2jar`: APK dex payload to a jar of JVM classes.
    Dex2Jar,
    /// `d2j-asm-verify`: bytecode verification of the converted jar.
    AsmVerify,
    /// `javac` from the JDK.
    Javac,
    /// AspectJ `ajc`, run through the JDK's `java` launcher.
    Ajc,
    /// `dx` from the Android build-tools.
    Dx,
    /// `jarsigner` from the JDK.
    Jarsigner,
    /// `zipalign` from the Android build-tools.
    Zipalign,
}

impl Tool {
    pub const ALL: [Tool; 7] = [
        Tool::Dex2Jar,
        Tool::AsmVerify,
        Tool::Javac,
        Tool::Ajc,
        Tool::Dx,
        Tool::Jarsigner,
        Tool::Zipalign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Dex2Jar => "dex2jar",
            Tool::AsmVerify => "asm-verify",
            Tool::Javac => "javac",
            Tool::Ajc => "ajc",
            Tool::Dx => "dx",
            Tool::Jarsigner => "jarsigner",
            Tool::Zipalign => "zipalign",
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A root directory or versioned subdirectory could not be found.
    #[error("cannot resolve '{pattern}' under '{}': {reason}", root.display())]
    Resolution {
        root: PathBuf,
        pattern: String,
        reason: String,
    },

    /// A resolved executable or required file is missing or unusable.
    #[error("{what} not found at '{}'", path.display())]
    NotFound { what: String, path: PathBuf },

    /// An external tool exited non-zero.
    #[error("{stage} stage: {tool} returned a non-zero exit status: {exit_code}")]
    ToolFailure {
        stage: Stage,
        tool: Tool,
        exit_code: i32,
    },

    /// An external tool could not be started at all.
    #[error("{stage} stage: failed to launch {tool} ('{}'): {source}", program.display())]
    Spawn {
        stage: Stage,
        tool: Tool,
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt archive '{}': {reason}", archive.display())]
    CorruptArchive { archive: PathBuf, reason: String },

    #[error("invalid recipe '{}': {reason}", recipe.display())]
    InvalidRecipe { recipe: PathBuf, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Wrap an IO error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(archive: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::CorruptArchive {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit code a failed run should terminate with.
    ///
    /// Tool failures propagate the tool's own code; everything else is 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ToolFailure { exit_code, .. } if *exit_code != 0 => *exit_code,
            _ => 1,
        }
    }

    /// Stage and tool that produced this error, when it came from a tool.
    pub fn tool(&self) -> Option<(Stage, Tool)> {
        match self {
            Self::ToolFailure { stage, tool, .. } | Self::Spawn { stage, tool, .. } => {
                Some((*stage, *tool))
            }
            _ => None,
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
