//! Sequential pipeline execution.
//!
//! ```text
//! Setup -> Decode -> Compile -> Weave -> Repackage -> Done
//!    \________\_________\_________\__________\______> Aborted(stage, exit code)
//! ```
//!
//! Stages run one after another on the calling thread. The first failure
//! ends the run; later stages are recorded as not run and the workspace is
//! left untouched for inspection.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, Tool};
use crate::invoker::ToolInvoker;
use crate::recipe::Recipe;
use crate::stages::{standard_stages, PipelineStage, Stage, StageContext};
use crate::workspace::Workspace;

/// Where a run is in the stage state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running(Stage),
    Done,
    /// Terminal. `exit_code` is the failing tool's code, or 1 for non-tool errors.
    Aborted { stage: Stage, exit_code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Passed,
    Failed,
    NotRun,
}

/// Per-stage line of a [`PipelineReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub tools_run: Vec<Tool>,
    pub skipped: Option<&'static str>,
}

/// Result of one run, successful or not.
#[derive(Debug)]
pub struct PipelineReport {
    pub state: PipelineState,
    pub stages: Vec<StageRecord>,
    /// Final APK location once Repackage (and delivery) succeeded.
    pub artifact: Option<PathBuf>,
    pub failure: Option<PipelineError>,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }

    /// Process exit code for this run: 0, or the failing tool's code.
    pub fn exit_code(&self) -> i32 {
        match self.state {
            PipelineState::Done => 0,
            PipelineState::Aborted { exit_code, .. } => exit_code,
            PipelineState::Pending | PipelineState::Running(_) => 1,
        }
    }

    pub fn record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Drives the stages over one workspace.
pub struct PipelineRunner<'a> {
    invoker: &'a dyn ToolInvoker,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl<'a> PipelineRunner<'a> {
    pub fn new(invoker: &'a dyn ToolInvoker) -> Self {
        Self::with_stages(invoker, standard_stages())
    }

    /// Run a custom stage list; stages are sorted into [`Stage`] order.
    pub fn with_stages(
        invoker: &'a dyn ToolInvoker,
        mut stages: Vec<Box<dyn PipelineStage>>,
    ) -> Self {
        stages.sort_by_key(|s| s.stage());
        Self { invoker, stages }
    }

    /// Execute every stage in order against `config`.
    ///
    /// Errors returned directly mean the run never started (bad recipe).
    /// Stage failures are reported through [`PipelineReport::failure`].
    pub fn run(&self, config: &PipelineConfig) -> Result<PipelineReport> {
        let recipe = Recipe::open(&config.recipe_dir)?;
        let workspace = Workspace::at(&config.workspace_root);
        let ctx = StageContext {
            workspace: &workspace,
            input_apk: &config.input_apk,
            recipe: &recipe,
            toolchain: &config.toolchain,
            signing: &config.signing,
            settings: &config.settings,
            invoker: self.invoker,
        };

        let total = self.stages.len();
        let mut report = PipelineReport {
            state: PipelineState::Pending,
            stages: self
                .stages
                .iter()
                .map(|s| StageRecord {
                    stage: s.stage(),
                    status: StageStatus::NotRun,
                    tools_run: Vec::new(),
                    skipped: None,
                })
                .collect(),
            artifact: None,
            failure: None,
        };

        for (index, stage) in self.stages.iter().enumerate() {
            let id = stage.stage();
            report.state = PipelineState::Running(id);
            info!("[{}/{}] {}: starting", index + 1, total, id);

            match stage.run(&ctx) {
                Ok(outcome) => {
                    info!("[{}/{}] {}: passed", index + 1, total, id);
                    let record = &mut report.stages[index];
                    record.status = StageStatus::Passed;
                    record.tools_run = outcome.tools_run;
                    record.skipped = outcome.skipped;
                    if outcome.artifact.is_some() {
                        report.artifact = outcome.artifact;
                    }
                }
                Err(err) => {
                    error!("[{}/{}] {}: failed: {}", index + 1, total, id, err);
                    return Ok(abort(report, id, err));
                }
            }
        }

        if let (Some(dest), Some(built)) = (&config.output, &report.artifact) {
            if let Err(err) = deliver(built, dest) {
                error!("delivering final APK failed: {}", err);
                return Ok(abort(report, Stage::Repackage, err));
            }
            report.artifact = Some(dest.clone());
        }

        report.state = PipelineState::Done;
        if let Some(artifact) = &report.artifact {
            info!(apk = %artifact.display(), "done");
        }
        Ok(report)
    }
}

/// Mark `stage` failed and end the run. A delivered artifact is withdrawn.
fn abort(mut report: PipelineReport, stage: Stage, err: PipelineError) -> PipelineReport {
    if let Some(record) = report.stages.iter_mut().find(|r| r.stage == stage) {
        record.status = StageStatus::Failed;
    }
    report.artifact = None;
    report.state = PipelineState::Aborted {
        stage,
        exit_code: err.exit_code(),
    };
    report.failure = Some(err);
    report
}

/// Copy the finished APK to the caller's chosen location.
fn deliver(built: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| PipelineError::io(format!("creating '{}'", parent.display()), e))?;
    }
    fs::copy(built, dest).map_err(|e| {
        PipelineError::io(
            format!("copying '{}' -> '{}'", built.display(), dest.display()),
            e,
        )
    })?;
    Ok(())
}
