use tracing::{info, warn};

use super::{PipelineStage, Stage, StageContext, StageOutcome};
use crate::error::{Result, Tool};
use crate::invoker::InvocationSpec;
use crate::paths::join_classpath;
use crate::workspace::copy_tree;

/// Seed `tmp/code` with the decoded classes and compile recipe sources into it.
pub struct Compile;

impl PipelineStage for Compile {
    fn stage(&self) -> Stage {
        Stage::Compile
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        let code_dir = ctx.workspace.code();

        copy_tree(&ctx.workspace.decoded(), &code_dir)?;
        info!(code = %code_dir.display(), "copied decoded classes");

        if !ctx.recipe.has_sources() {
            info!("skipping compilation; no custom classes found in recipe source");
            outcome.skipped = Some("recipe source directory is empty");
            return Ok(outcome);
        }
        let sources = ctx.recipe.java_sources();
        if sources.is_empty() {
            warn!(
                source = %ctx.recipe.source().display(),
                "skipping compilation; recipe source has files but none end in .java"
            );
            outcome.skipped = Some("recipe source directory has no .java files");
            return Ok(outcome);
        }

        let program = ctx.toolchain.program(Tool::Javac)?;
        let javac = InvocationSpec::new(Stage::Compile, Tool::Javac, program)
            .arg("-d")
            .arg(&code_dir)
            .arg("-classpath")
            .arg(join_classpath(&ctx.toolchain.aspectj_jars()?)?)
            .arg("-sourcepath")
            .arg(ctx.recipe.source())
            .arg("-bootclasspath")
            .arg(join_classpath(&ctx.toolchain.platform_jars()?)?)
            .arg("-g:none")
            .arg("-Xlint:-unchecked")
            .args(&sources);
        ctx.run_tool(javac, &mut outcome)?;
        info!(files = sources.len(), "compiled custom classes");

        Ok(outcome)
    }
}
