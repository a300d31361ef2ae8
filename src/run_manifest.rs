//! Post-run record written next to the workspace tree.
//!
//! `<workspace>/run-manifest.json` says which stages ran, which tools they
//! invoked, where the run stopped and what it produced. It is rewritten on
//! every run, successful or not.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::config::PipelineConfig;
use crate::pipeline::{PipelineReport, PipelineState, StageStatus};

pub const RUN_MANIFEST_FILENAME: &str = "run-manifest.json";
const SCHEMA_VERSION: u32 = 1;

static RUNS_STARTED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema: u32,
    pub run_id: String,
    /// `success` or `failed`.
    pub status: String,
    pub input_apk: PathBuf,
    pub recipe_dir: PathBuf,
    pub created_at_utc: String,
    pub finished_at_utc: String,
    pub stages: Vec<StageEntry>,
    pub failure: Option<FailureEntry>,
    pub artifact: Option<ArtifactEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: String,
    /// `passed`, `failed` or `not_run`.
    pub status: String,
    pub tools: Vec<String>,
    pub skipped: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub stage: String,
    pub tool: Option<String>,
    pub exit_code: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

impl RunManifest {
    pub fn from_report(
        run_id: String,
        config: &PipelineConfig,
        report: &PipelineReport,
        created_at_utc: String,
    ) -> Result<Self> {
        let stages = report
            .stages
            .iter()
            .map(|record| StageEntry {
                stage: record.stage.to_string(),
                status: match record.status {
                    StageStatus::Passed => "passed",
                    StageStatus::Failed => "failed",
                    StageStatus::NotRun => "not_run",
                }
                .to_string(),
                tools: record.tools_run.iter().map(|t| t.to_string()).collect(),
                skipped: record.skipped.map(str::to_string),
            })
            .collect();

        let failure = match (&report.state, &report.failure) {
            (PipelineState::Aborted { stage, exit_code }, Some(err)) => Some(FailureEntry {
                stage: stage.to_string(),
                tool: err.tool().map(|(_, tool)| tool.to_string()),
                exit_code: *exit_code,
                message: err.to_string(),
            }),
            _ => None,
        };

        let artifact = match (&report.artifact, report.succeeded()) {
            (Some(path), true) => Some(describe_artifact(path)?),
            _ => None,
        };

        Ok(Self {
            schema: SCHEMA_VERSION,
            run_id,
            status: if report.succeeded() { "success" } else { "failed" }.to_string(),
            input_apk: config.input_apk.clone(),
            recipe_dir: config.recipe_dir.clone(),
            created_at_utc,
            finished_at_utc: utc_timestamp(),
            stages,
            failure,
            artifact,
        })
    }
}

pub fn manifest_path(workspace_root: &Path) -> PathBuf {
    workspace_root.join(RUN_MANIFEST_FILENAME)
}

/// Serialize `manifest` and swap it in with a rename, so readers see either
/// the previous manifest or the complete new one.
pub fn write_run_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    let mut json = serde_json::to_string_pretty(manifest).context("serializing run manifest")?;
    json.push('\n');

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("creating '{}'", dir.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| RUN_MANIFEST_FILENAME.to_string());
    let partial = dir.join(format!(".{}.partial", file_name));
    let mut file =
        File::create(&partial).with_context(|| format!("creating '{}'", partial.display()))?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .with_context(|| format!("writing '{}'", partial.display()))?;
    drop(file);

    fs::rename(&partial, path)
        .with_context(|| format!("writing run manifest '{}'", path.display()))
}

pub fn load_run_manifest(path: &Path) -> Result<RunManifest> {
    let bytes =
        fs::read(path).with_context(|| format!("reading run manifest '{}'", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing run manifest '{}'", path.display()))
}

fn describe_artifact(path: &Path) -> Result<ArtifactEntry> {
    let mut file =
        fs::File::open(path).with_context(|| format!("opening artifact '{}'", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("hashing artifact '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        size += n as u64;
        hasher.update(&buf[..n]);
    }
    Ok(ArtifactEntry {
        path: path.to_path_buf(),
        sha256: format!("{:x}", hasher.finalize()),
        size_bytes: size,
    })
}

/// Run identifier: the start time plus a short digest that tells apart runs
/// started within the same second, e.g. `20260101T120000Z-3fa2c1d0`.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(RUNS_STARTED.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    let digest = hasher.finalize();
    format!(
        "{}-{:02x}{:02x}{:02x}{:02x}",
        utc_timestamp(),
        digest[0],
        digest[1],
        digest[2],
        digest[3]
    )
}

/// Current UTC time as `YYYYMMDDTHHMMSSZ`.
pub fn utc_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}Z",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}
