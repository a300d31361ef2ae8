//! Shared fixtures for pipeline integration tests.
//!
//! [`ScriptedInvoker`] stands in for the JDK/SDK tools: each tool call writes
//! the files the real tool would produce, or returns a configured exit code.
//! [`Fixture`] lays out an input APK, a recipe and a fake toolchain whose
//! executables are empty scripts, so path resolution behaves as in production.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use apkweave::config::{BuildSettings, PipelineConfig, SigningConfig};
use apkweave::error::Result;
use apkweave::invoker::{ExitCode, InvocationSpec, ToolInvoker};
use apkweave::{Tool, Toolchain};
use tempfile::TempDir;
use zip::write::FileOptions;

/// Bytes the scripted `dx` writes as the re-assembled dex.
pub const WOVEN_DEX: &[u8] = b"dex:woven";
/// Bytes of the dex inside the input APK.
pub const ORIGINAL_DEX: &[u8] = b"dex:original";

/// Records every call and fakes each tool's output.
#[derive(Default)]
pub struct ScriptedInvoker {
    exit_codes: HashMap<Tool, i32>,
    calls: RefCell<Vec<InvocationSpec>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tool` exit with `code` instead of producing output.
    pub fn failing(mut self, tool: Tool, code: i32) -> Self {
        self.exit_codes.insert(tool, code);
        self
    }

    pub fn calls(&self) -> Vec<InvocationSpec> {
        self.calls.borrow().clone()
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.calls.borrow().iter().map(|c| c.tool).collect()
    }

    pub fn call(&self, tool: Tool) -> Option<InvocationSpec> {
        self.calls.borrow().iter().find(|c| c.tool == tool).cloned()
    }

    fn produce(spec: &InvocationSpec) {
        let path_after = |flag: &str| {
            PathBuf::from(
                spec.flag_value(flag)
                    .unwrap_or_else(|| panic!("{} called without {}", spec.tool, flag)),
            )
        };
        let positional = |from_end: usize| PathBuf::from(&spec.args[spec.args.len() - from_end]);

        match spec.tool {
            Tool::Dex2Jar => write_zip(
                &path_after("-o"),
                &[
                    ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
                    ("com/example/App.class", b"class:decoded"),
                ],
            ),
            Tool::AsmVerify => assert!(positional(1).is_file(), "verifier input missing"),
            Tool::Javac => {
                let out = path_after("-d").join("com/example/Injected.class");
                write_file(&out, b"class:injected");
            }
            Tool::Ajc => {
                let inpath = path_after("-inpath");
                assert!(inpath.join("com/example/App.class").is_file());
                let out = path_after("-d").join("com/example/App.class");
                write_file(&out, b"class:woven");
            }
            Tool::Dx => write_file(&path_after("--output"), WOVEN_DEX),
            Tool::Jarsigner => assert!(positional(2).is_file(), "unsigned APK missing"),
            Tool::Zipalign => {
                let dest = positional(1);
                fs::copy(positional(2), &dest).unwrap();
            }
        }
    }
}

impl ToolInvoker for ScriptedInvoker {
    fn invoke(&self, spec: &InvocationSpec) -> Result<ExitCode> {
        self.calls.borrow_mut().push(spec.clone());
        if let Some(code) = self.exit_codes.get(&spec.tool) {
            return Ok(*code);
        }
        Self::produce(spec);
        Ok(0)
    }
}

/// Input APK, recipe and fake toolchain in one temporary directory.
pub struct Fixture {
    pub temp: TempDir,
    pub config: PipelineConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();

        let apk = root.join("in/app.apk");
        write_zip(
            &apk,
            &[
                ("AndroidManifest.xml", b"<manifest/>"),
                ("classes.dex", ORIGINAL_DEX),
                ("META-INF/CERT.RSA", b"old signature"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
                ("lib/armeabi-v7a/libnative.so", b"native:old"),
                ("res/values/strings.xml", b"<resources/>"),
            ],
        );

        let recipe = root.join("recipe");
        for dir in ["source", "aspects", "libraries"] {
            fs::create_dir_all(recipe.join(dir)).unwrap();
        }
        write_file(
            &recipe.join("aspects/Trace.aj"),
            b"aspect Trace { before(): execution(* *(..)) {} }",
        );

        for bin in ["javac", "java", "jarsigner"] {
            write_executable(&root.join("jdk/bin").join(bin));
        }
        for script in ["d2j-dex2jar.sh", "d2j-asm-verify.sh"] {
            write_executable(&root.join("tools/dex2jar").join(script));
        }
        for bin in ["dx", "zipalign"] {
            write_executable(&root.join("sdk/build-tools/28.0.3").join(bin));
        }
        write_file(&root.join("sdk/platforms/android-28/android.jar"), b"");
        write_file(&root.join("tools/aspectj/aspectjrt.jar"), b"runtime");
        write_file(&root.join("tools/aspectj/lib/aspectjtools.jar"), b"");

        let config = PipelineConfig {
            input_apk: apk,
            recipe_dir: recipe,
            workspace_root: root.join("build"),
            output: None,
            toolchain: Toolchain::new(root.join("jdk"), root.join("sdk"), root.join("tools")),
            signing: SigningConfig {
                key_store: root.join("test_key_store.jks"),
                store_password: "password".into(),
                alias: "test_alias".into(),
                alias_password: Some("password".into()),
            },
            settings: BuildSettings::default(),
        };

        Self { temp, config }
    }

    pub fn recipe_file(&self, rel: &str, contents: &[u8]) {
        write_file(&self.config.recipe_dir.join(rel), contents);
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace_root
    }
}

pub fn write_file(path: &Path, contents: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

pub fn write_executable(path: &Path) {
    write_file(path, b"#!/bin/sh\nexit 0\n");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut zip = zip::ZipWriter::new(fs::File::create(path).unwrap());
    for (name, contents) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(contents).unwrap();
    }
    zip.finish().unwrap();
}

/// File entries of a zip archive by name; directory entries are skipped.
pub fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        if file.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();
        entries.insert(file.name().to_string(), bytes);
    }
    entries
}
