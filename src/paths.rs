//! Toolchain path resolution.
//!
//! Turns the JDK root, Android SDK root and bundled tools directory into the
//! concrete executables and jar sets each stage needs. Newest-version
//! selection is a plain descending name sort, so `build-tools/34.0.0` beats
//! `build-tools/33.0.2` but `9.0.0` would beat `28.0.3`.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PipelineError, Result, Tool};

/// How an executable is shipped, which decides its file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Compiled binary: no suffix on POSIX, `.exe` on Windows.
    Native,
    /// SDK launcher wrapper: no suffix on POSIX, `.bat` on Windows.
    Launcher,
    /// Bundled shell script: `.sh` on POSIX, `.bat` on Windows.
    Script,
}

impl ToolKind {
    pub fn suffix(self) -> &'static str {
        match (self, cfg!(windows)) {
            (ToolKind::Native, true) => ".exe",
            (ToolKind::Launcher, true) | (ToolKind::Script, true) => ".bat",
            (ToolKind::Native, false) | (ToolKind::Launcher, false) => "",
            (ToolKind::Script, false) => ".sh",
        }
    }
}

/// Return the lexicographically greatest entry under `root` matching `pattern`.
///
/// `pattern` is a glob relative to `root`, e.g. `platforms/*`.
pub fn resolve_latest(root: &Path, pattern: &str) -> Result<PathBuf> {
    let resolution_error = |reason: &str| PipelineError::Resolution {
        root: root.to_path_buf(),
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if !root.is_dir() {
        return Err(resolution_error("root directory does not exist"));
    }

    let root_str = root
        .to_str()
        .ok_or_else(|| resolution_error("path is not valid UTF-8"))?;
    let query = format!(
        "{}{}{}",
        glob::Pattern::escape(root_str),
        std::path::MAIN_SEPARATOR,
        pattern
    );

    let mut matches = glob::glob(&query)
        .map_err(|e| resolution_error(&format!("invalid pattern: {}", e)))?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();

    matches.sort_by(|a, b| b.file_name().cmp(&a.file_name()).then_with(|| b.cmp(a)));
    matches
        .into_iter()
        .next()
        .ok_or_else(|| resolution_error("no matching entries"))
}

/// Build the path of `name` inside `base_dir` with the platform suffix for `kind`.
///
/// Fails fast when the file is missing or, on Unix, not executable.
pub fn resolve_executable(base_dir: &Path, name: &str, kind: ToolKind) -> Result<PathBuf> {
    let path = base_dir.join(format!("{}{}", name, kind.suffix()));
    if !is_executable(&path) {
        return Err(PipelineError::NotFound {
            what: format!("executable '{}'", name),
            path,
        });
    }
    Ok(path)
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => {
            if !meta.is_file() {
                return false;
            }
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if meta.permissions().mode() & 0o111 == 0 {
                    return false;
                }
            }
            true
        }
        Err(_) => false,
    }
}

/// Sorted `*.jar` files in `dir`, descending into subdirectories when `recursive`.
pub fn collect_jars(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(PipelineError::NotFound {
            what: "jar directory".to_string(),
            path: dir.to_path_buf(),
        });
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut jars = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(max_depth) {
        let entry = entry.map_err(|e| {
            PipelineError::io(
                format!("listing jars under '{}'", dir.display()),
                e.into(),
            )
        })?;
        let is_jar = entry
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"));
        if entry.file_type().is_file() && is_jar {
            jars.push(entry.into_path());
        }
    }
    jars.sort();
    Ok(jars)
}

/// Join classpath entries with the host separator (`:` on POSIX, `;` on Windows).
pub fn join_classpath(entries: &[PathBuf]) -> Result<OsString> {
    std::env::join_paths(entries).map_err(|e| {
        PipelineError::io(
            "joining classpath",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        )
    })
}

/// Explicit toolchain configuration handed to every stage.
///
/// Roots are taken as given; nothing here reads the environment.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// JDK installation root (contains `bin/javac`).
    pub java_home: PathBuf,
    /// Android SDK root (contains `platforms/` and `build-tools/`).
    pub android_sdk: PathBuf,
    /// Bundled tools (contains `dex2jar/` and `aspectj/`).
    pub tools_dir: PathBuf,
}

impl Toolchain {
    pub fn new(java_home: PathBuf, android_sdk: PathBuf, tools_dir: PathBuf) -> Self {
        Self {
            java_home,
            android_sdk,
            tools_dir,
        }
    }

    pub fn jdk_tool(&self, name: &str) -> Result<PathBuf> {
        resolve_executable(&self.java_home.join("bin"), name, ToolKind::Native)
    }

    pub fn dex2jar_tool(&self, name: &str) -> Result<PathBuf> {
        resolve_executable(&self.tools_dir.join("dex2jar"), name, ToolKind::Script)
    }

    /// Newest `build-tools/<version>` directory in the SDK.
    pub fn build_tools_dir(&self) -> Result<PathBuf> {
        resolve_latest(&self.android_sdk, "build-tools/*")
    }

    pub fn build_tool(&self, name: &str, kind: ToolKind) -> Result<PathBuf> {
        resolve_executable(&self.build_tools_dir()?, name, kind)
    }

    /// Executable that runs `tool`. AspectJ runs on the JDK's `java`.
    pub fn program(&self, tool: Tool) -> Result<PathBuf> {
        match tool {
            Tool::Dex2Jar => self.dex2jar_tool("d2j-dex2jar"),
            Tool::AsmVerify => self.dex2jar_tool("d2j-asm-verify"),
            Tool::Javac => self.jdk_tool("javac"),
            Tool::Ajc => self.jdk_tool("java"),
            Tool::Jarsigner => self.jdk_tool("jarsigner"),
            Tool::Dx => self.build_tool("dx", ToolKind::Launcher),
            Tool::Zipalign => self.build_tool("zipalign", ToolKind::Native),
        }
    }

    /// Newest `platforms/android-<api>` directory in the SDK.
    pub fn platform_dir(&self) -> Result<PathBuf> {
        resolve_latest(&self.android_sdk, "platforms/*")
    }

    /// Jars at the top level of the newest platform (the boot classpath).
    pub fn platform_jars(&self) -> Result<Vec<PathBuf>> {
        collect_jars(&self.platform_dir()?, false)
    }

    pub fn aspectj_dir(&self) -> PathBuf {
        self.tools_dir.join("aspectj")
    }

    /// Every jar shipped with the bundled AspectJ distribution.
    pub fn aspectj_jars(&self) -> Result<Vec<PathBuf>> {
        collect_jars(&self.aspectj_dir(), true)
    }

    /// The AspectJ runtime that woven code needs at run time.
    pub fn aspectj_runtime(&self) -> Result<PathBuf> {
        let path = self.aspectj_dir().join("aspectjrt.jar");
        if !path.is_file() {
            return Err(PipelineError::NotFound {
                what: "AspectJ runtime".to_string(),
                path,
            });
        }
        Ok(path)
    }
}
