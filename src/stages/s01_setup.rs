use tracing::info;

use super::{PipelineStage, Stage, StageContext, StageOutcome};
use crate::error::Result;
use crate::workspace::{extract_archive_into, Workspace};

/// Fresh workspace with the input APK unpacked, signature stripped.
pub struct Setup;

impl PipelineStage for Setup {
    fn stage(&self) -> Stage {
        Stage::Setup
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let workspace = Workspace::reset(ctx.workspace.root())?;
        info!(root = %workspace.root().display(), "created build directory structure");

        extract_archive_into(ctx.input_apk, &workspace.staging())?;
        info!(apk = %ctx.input_apk.display(), "extracted package into staging");

        Ok(StageOutcome::default())
    }
}
