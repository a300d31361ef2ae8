use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use fs2::FileExt;
use tracing::{error, info, warn};

use apkweave::config::{discover_config_file, ConfigLayer, PipelineConfig};
use apkweave::invoker::ProcessInvoker;
use apkweave::logging::{self, LoggingConfig, LOG_JSON_ENV, LOG_LEVEL_ENV};
use apkweave::pipeline::PipelineRunner;
use apkweave::preflight::check_toolchain;
use apkweave::run_manifest::{
    generate_run_id, manifest_path, utc_timestamp, write_run_manifest, RunManifest,
};

/// Long options that may also be spelled with a single dash (`-java-home`).
const LONG_OPTIONS: &[&str] = &[
    "java-home",
    "android-sdk",
    "tools-dir",
    "workspace",
    "output",
    "config",
    "key-store",
    "key-store-password",
    "key-store-alias",
    "key-store-alias-password",
    "log-level",
    "log-json",
];

/// Inject recipe classes and AspectJ aspects into an Android APK
#[derive(Parser, Debug)]
#[command(
    name = "apkweave",
    version,
    about = "Inject recipe classes and AspectJ aspects into an Android APK",
    long_about = "Decodes APK_FILE, compiles RECIPE_DIR/source on top of its classes, weaves \
                  RECIPE_DIR/aspects in, merges RECIPE_DIR/libraries into lib/, then re-signs \
                  and aligns the result into <workspace>/output.\n\n\
                  Examples:\n  \
                  apkweave app.apk recipe\n  \
                  apkweave app.apk recipe -java-home /usr/lib/jvm/java-11 -o woven.apk"
)]
struct Cli {
    #[arg(value_name = "APK_FILE", help = "APK to inject into")]
    apk_file: PathBuf,

    #[arg(
        value_name = "RECIPE_DIR",
        help = "Directory with source/, aspects/ and libraries/"
    )]
    recipe_dir: PathBuf,

    #[arg(long, env = "JAVA_HOME", value_name = "DIR", help = "JDK root")]
    java_home: Option<PathBuf>,

    #[arg(
        long,
        env = "ANDROID_HOME",
        value_name = "DIR",
        help = "Android SDK root (falls back to ANDROID_SDK_ROOT)"
    )]
    android_sdk: Option<PathBuf>,

    #[arg(
        long,
        env = "APKWEAVE_TOOLS",
        value_name = "DIR",
        help = "Bundled dex2jar/ and aspectj/ tools [default: ./tools]"
    )]
    tools_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Workspace root [default: ./build]")]
    workspace: Option<PathBuf>,

    #[arg(short = 'o', long, value_name = "FILE", help = "Copy the final APK here")]
    output: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Config file [default: ./apkweave.toml]")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Signing key store [default: test_key_store.jks]")]
    key_store: Option<PathBuf>,

    #[arg(long, value_name = "PASSWORD", help = "Key store password [default: password]")]
    key_store_password: Option<String>,

    #[arg(long, value_name = "ALIAS", help = "Key alias [default: test_alias]")]
    key_store_alias: Option<String>,

    #[arg(long, value_name = "PASSWORD", help = "Key alias password [default: password]")]
    key_store_alias_password: Option<String>,

    #[arg(
        long,
        env = LOG_LEVEL_ENV,
        value_name = "LEVEL",
        default_value = "info",
        help = "Set logging level"
    )]
    log_level: String,

    #[arg(long, env = LOG_JSON_ENV, help = "Emit logs as JSON lines")]
    log_json: bool,
}

impl Cli {
    /// Command line and environment, the highest-precedence layer.
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            java_home: self.java_home.clone(),
            android_sdk: self
                .android_sdk
                .clone()
                .or_else(|| std::env::var_os("ANDROID_SDK_ROOT").map(PathBuf::from)),
            tools_dir: self.tools_dir.clone(),
            workspace: self.workspace.clone(),
            output: self.output.clone(),
            key_store: self.key_store.clone(),
            key_store_password: self.key_store_password.clone(),
            key_store_alias: self.key_store_alias.clone(),
            key_store_alias_password: self.key_store_alias_password.clone(),
            ..ConfigLayer::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));

    logging::init_logging(LoggingConfig {
        level: logging::parse_level(&cli.log_level),
        use_json: cli.log_json,
        ..LoggingConfig::default()
    });

    match run(cli) {
        Ok(code) => to_exit_code(code),
        Err(err) => {
            eprintln!("Error: {:?}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let cwd = std::env::current_dir().context("resolving current directory")?;

    let file_layer = discover_config_file(cli.config.as_deref(), &cwd)?;
    let discovered = ConfigLayer {
        java_home: java_home_from_path(),
        ..ConfigLayer::default()
    };
    let config = cli
        .layer()
        .merge(file_layer)
        .merge(discovered)
        .merge(ConfigLayer::defaults())
        .finish(cli.apk_file.clone(), cli.recipe_dir.clone())?;
    let config = absolutize(config, &cwd);

    validate_inputs(&config)?;
    check_workspace_root(&config, &cwd)?;
    check_toolchain(&config.toolchain)?;

    let _lock = lock_workspace(&config.workspace_root)?;

    let run_id = generate_run_id();
    let created_at = utc_timestamp();
    info!(run_id = %run_id, apk = %config.input_apk.display(), "starting pipeline");

    let report = PipelineRunner::new(&ProcessInvoker)
        .run(&config)
        .context("starting pipeline")?;

    let manifest_file = manifest_path(&config.workspace_root);
    match RunManifest::from_report(run_id, &config, &report, created_at)
        .and_then(|manifest| write_run_manifest(&manifest_file, &manifest))
    {
        Ok(()) => info!(manifest = %manifest_file.display(), "wrote run manifest"),
        Err(err) => warn!("run manifest not written: {:#}", err),
    }

    if let Some(failure) = &report.failure {
        error!("{}", failure);
    }
    if let (true, Some(artifact)) = (report.succeeded(), &report.artifact) {
        println!("{}", artifact.display());
    }
    Ok(report.exit_code())
}

/// Rewrite `-java-home`-style single-dash long options to `--java-home`.
fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;
    for arg in args {
        if passthrough {
            out.push(arg);
            continue;
        }
        if arg == "--" {
            passthrough = true;
            out.push(arg);
            continue;
        }
        let rewritten = arg.to_str().and_then(|s| {
            let rest = s.strip_prefix('-').filter(|r| !r.starts_with('-'))?;
            let name = rest.split('=').next().unwrap_or(rest);
            LONG_OPTIONS
                .contains(&name)
                .then(|| OsString::from(format!("-{}", s)))
        });
        out.push(rewritten.unwrap_or(arg));
    }
    out
}

/// JDK root of the first `javac` on `PATH` (`<root>/bin/javac`).
fn java_home_from_path() -> Option<PathBuf> {
    let javac = which::which("javac").ok()?;
    let javac = fs::canonicalize(&javac).unwrap_or(javac);
    javac.parent()?.parent().map(Path::to_path_buf)
}

fn absolutize(mut config: PipelineConfig, cwd: &Path) -> PipelineConfig {
    let abs = |p: &Path| lexical_normalize(&cwd.join(p));
    config.input_apk = abs(&config.input_apk);
    config.recipe_dir = abs(&config.recipe_dir);
    config.workspace_root = abs(&config.workspace_root);
    config.output = config.output.as_deref().map(abs);
    config.toolchain.java_home = abs(&config.toolchain.java_home);
    config.toolchain.android_sdk = abs(&config.toolchain.android_sdk);
    config.toolchain.tools_dir = abs(&config.toolchain.tools_dir);
    config.signing.key_store = abs(&config.signing.key_store);
    config
}

/// Every input path must be readable before any stage runs.
fn validate_inputs(config: &PipelineConfig) -> Result<()> {
    readable_file(&config.input_apk, "APK file")?;
    readable_dir(&config.recipe_dir, "recipe directory")?;
    readable_dir(&config.toolchain.java_home, "JDK root")?;
    readable_dir(&config.toolchain.android_sdk, "Android SDK root")?;
    readable_dir(&config.toolchain.tools_dir, "tools directory")?;
    readable_file(&config.signing.key_store, "key store")?;
    if config.output.as_deref() == Some(config.input_apk.as_path()) {
        bail!(
            "output '{}' would overwrite the input APK",
            config.input_apk.display()
        );
    }
    Ok(())
}

/// The workspace is wiped on every run, so it must not hold any input, the
/// delivery path or the working directory, and must not sit inside the recipe.
fn check_workspace_root(config: &PipelineConfig, cwd: &Path) -> Result<()> {
    let root = resolved(&config.workspace_root);
    let guarded = [
        (Some(config.input_apk.as_path()), "APK file"),
        (Some(config.recipe_dir.as_path()), "recipe directory"),
        (Some(config.signing.key_store.as_path()), "key store"),
        (config.output.as_deref(), "output"),
        (Some(config.toolchain.java_home.as_path()), "JDK root"),
        (Some(config.toolchain.android_sdk.as_path()), "Android SDK root"),
        (Some(config.toolchain.tools_dir.as_path()), "tools directory"),
        (Some(cwd), "current directory"),
    ];
    for (path, what) in guarded {
        let Some(path) = path else { continue };
        if resolved(path).starts_with(&root) {
            bail!(
                "workspace '{}' would delete the {} '{}'; choose a separate workspace directory",
                config.workspace_root.display(),
                what,
                path.display()
            );
        }
    }
    if root.starts_with(resolved(&config.recipe_dir)) {
        bail!(
            "workspace '{}' lies inside the recipe directory '{}'",
            config.workspace_root.display(),
            config.recipe_dir.display()
        );
    }
    Ok(())
}

/// Canonical form when the path exists, so symlinked parents compare equal.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(real) = fs::canonicalize(path) {
        return real;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => resolved(parent).join(name),
        _ => path.to_path_buf(),
    }
}

/// Drop `.` components and fold `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn readable_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{} '{}' is not a file", what, path.display());
    }
    File::open(path).with_context(|| format!("{} '{}' is not readable", what, path.display()))?;
    Ok(())
}

fn readable_dir(path: &Path, what: &str) -> Result<()> {
    fs::read_dir(path)
        .with_context(|| format!("{} '{}' is not a readable directory", what, path.display()))?;
    Ok(())
}

/// Advisory lock on `<root>.lock`, held until the returned file is dropped.
fn lock_workspace(root: &Path) -> Result<File> {
    let mut name = root.as_os_str().to_os_string();
    name.push(".lock");
    let lock_path = PathBuf::from(name);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }

    // Never unlink the lock file: a second process could then lock a fresh
    // file at the same path while the first still holds the old one.
    let lock_file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("creating lock file '{}'", lock_path.display()))?;

    lock_file.try_lock_exclusive().map_err(|_| {
        anyhow!(
            "workspace '{}' is in use by another run (lock '{}')",
            root.display(),
            lock_path.display()
        )
    })?;
    Ok(lock_file)
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(exit_status_byte(code))
}

/// Pipeline exit code as a process status byte; out-of-range codes become 1.
fn exit_status_byte(code: i32) -> u8 {
    if code == 0 {
        return 0;
    }
    u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1)
}
