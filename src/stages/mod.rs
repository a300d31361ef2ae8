//! Pipeline stages.
//!
//! Each stage reads the workspace left by the previous one and writes only
//! into `tmp/*` or `staging/` (Repackage also writes the final artifact into
//! `output/`). Stages run strictly in [`Stage`] order; see
//! [`crate::pipeline::PipelineRunner`].

pub mod s01_setup;
pub mod s02_decode;
pub mod s03_compile;
pub mod s04_weave;
pub mod s05_repackage;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::config::{BuildSettings, SigningConfig};
use crate::error::{Result, Tool};
use crate::invoker::{InvocationSpec, ToolInvoker};
use crate::paths::Toolchain;
use crate::recipe::Recipe;
use crate::workspace::Workspace;

pub use s01_setup::Setup;
pub use s02_decode::Decode;
pub use s03_compile::Compile;
pub use s04_weave::Weave;
pub use s05_repackage::Repackage;

/// Stage identity, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Stage {
    /// Reset the workspace and unpack the APK into `staging/`.
    Setup = 1,
    /// dex2jar + verify, then unpack classes into `decoded/`.
    Decode = 2,
    /// Compile recipe sources on top of the decoded classes.
    Compile = 3,
    /// Weave recipe aspects into the compiled classes.
    Weave = 4,
    /// dx, merge libraries, zip, sign and align.
    Repackage = 5,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Setup,
        Stage::Decode,
        Stage::Compile,
        Stage::Weave,
        Stage::Repackage,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Setup => write!(f, "Setup"),
            Stage::Decode => write!(f, "Decode"),
            Stage::Compile => write!(f, "Compile"),
            Stage::Weave => write!(f, "Weave"),
            Stage::Repackage => write!(f, "Repackage"),
        }
    }
}

/// Read-only inputs shared by every stage of a run.
pub struct StageContext<'a> {
    pub workspace: &'a Workspace,
    pub input_apk: &'a Path,
    pub recipe: &'a Recipe,
    pub toolchain: &'a Toolchain,
    pub signing: &'a SigningConfig,
    pub settings: &'a BuildSettings,
    pub invoker: &'a dyn ToolInvoker,
}

impl StageContext<'_> {
    /// Run one tool call and record it in `outcome`.
    pub fn run_tool(&self, spec: InvocationSpec, outcome: &mut StageOutcome) -> Result<()> {
        debug!(stage = %spec.stage, tool = %spec.tool, command = %spec.display(), "invoking");
        self.invoker.run(&spec)?;
        outcome.tools_run.push(spec.tool);
        Ok(())
    }
}

/// What a successful stage did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Tools that ran to success, in order.
    pub tools_run: Vec<Tool>,
    /// Set when the stage deliberately skipped its tool work.
    pub skipped: Option<&'static str>,
    /// Final artifact, produced only by Repackage.
    pub artifact: Option<PathBuf>,
}

/// A unit of the pipeline.
pub trait PipelineStage {
    fn stage(&self) -> Stage;

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome>;
}

/// The five stages in execution order.
pub fn standard_stages() -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(Setup),
        Box::new(Decode),
        Box::new(Compile),
        Box::new(Weave),
        Box::new(Repackage),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::invoker::ExitCode;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    /// Exits with `code` and counts calls.
    struct FixedExit {
        code: ExitCode,
        calls: Cell<usize>,
    }

    impl ToolInvoker for FixedExit {
        fn invoke(&self, _spec: &InvocationSpec) -> Result<ExitCode> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.code)
        }
    }

    fn with_context(code: ExitCode, check: impl FnOnce(&StageContext<'_>, &FixedExit)) {
        let temp = TempDir::new().unwrap();
        let recipe_dir = temp.path().join("recipe");
        for dir in ["source", "aspects", "libraries"] {
            fs::create_dir_all(recipe_dir.join(dir)).unwrap();
        }
        let recipe = Recipe::open(&recipe_dir).unwrap();
        let workspace = Workspace::at(temp.path().join("build"));
        let apk = temp.path().join("app.apk");
        let toolchain = Toolchain::new("jdk".into(), "sdk".into(), "tools".into());
        let signing = SigningConfig {
            key_store: "k.jks".into(),
            store_password: "p".into(),
            alias: "a".into(),
            alias_password: None,
        };
        let settings = BuildSettings::default();
        let invoker = FixedExit {
            code,
            calls: Cell::new(0),
        };
        let ctx = StageContext {
            workspace: &workspace,
            input_apk: &apk,
            recipe: &recipe,
            toolchain: &toolchain,
            signing: &signing,
            settings: &settings,
            invoker: &invoker,
        };
        check(&ctx, &invoker);
    }

    #[test]
    fn test_run_tool_invokes_once_and_records_success() {
        with_context(0, |ctx, invoker| {
            let mut outcome = StageOutcome::default();
            let spec = InvocationSpec::new(Stage::Weave, Tool::Ajc, PathBuf::from("java"));
            ctx.run_tool(spec, &mut outcome).unwrap();
            assert_eq!(invoker.calls.get(), 1);
            assert_eq!(outcome.tools_run, vec![Tool::Ajc]);
        });
    }

    #[test]
    fn test_run_tool_failure_is_not_recorded() {
        with_context(4, |ctx, invoker| {
            let mut outcome = StageOutcome::default();
            let spec = InvocationSpec::new(Stage::Repackage, Tool::Dx, PathBuf::from("dx"));
            let err = ctx.run_tool(spec, &mut outcome).unwrap_err();
            assert!(matches!(
                err,
                PipelineError::ToolFailure {
                    stage: Stage::Repackage,
                    tool: Tool::Dx,
                    exit_code: 4
                }
            ));
            assert_eq!(invoker.calls.get(), 1);
            assert!(outcome.tools_run.is_empty());
        });
    }

    #[test]
    fn test_standard_stages_follow_stage_order() {
        let order = standard_stages()
            .iter()
            .map(|s| s.stage())
            .collect::<Vec<_>>();
        assert_eq!(order, Stage::ALL.to_vec());

        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, order);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Repackage.to_string(), "Repackage");
        assert_eq!(
            serde_json::to_string(&Stage::Compile).unwrap(),
            "\"compile\""
        );
    }
}
