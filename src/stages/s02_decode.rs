use tracing::info;

use super::{PipelineStage, Stage, StageContext, StageOutcome};
use crate::error::{Result, Tool};
use crate::invoker::InvocationSpec;
use crate::workspace::extract_archive_into;

/// Convert the APK's dex payload to a jar, verify it, unpack it into `decoded/`.
pub struct Decode;

impl PipelineStage for Decode {
    fn stage(&self) -> Stage {
        Stage::Decode
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        let jar = ctx.workspace.decoded_jar();

        let dex2jar = InvocationSpec::new(
            Stage::Decode,
            Tool::Dex2Jar,
            ctx.toolchain.program(Tool::Dex2Jar)?,
        )
        .arg("-f")
        .arg("-o")
        .arg(&jar)
        .arg(ctx.input_apk);
        ctx.run_tool(dex2jar, &mut outcome)?;
        info!(jar = %jar.display(), "converted package via dex2jar");

        // Extraction is only trusted after the verifier has passed.
        let verify = InvocationSpec::new(
            Stage::Decode,
            Tool::AsmVerify,
            ctx.toolchain.program(Tool::AsmVerify)?,
        )
        .arg(&jar);
        ctx.run_tool(verify, &mut outcome)?;
        info!("verified jar");

        extract_archive_into(&jar, &ctx.workspace.decoded())?;
        info!(decoded = %ctx.workspace.decoded().display(), "extracted jar file");

        Ok(outcome)
    }
}
