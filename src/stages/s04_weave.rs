use std::fs;

use tracing::info;

use super::{PipelineStage, Stage, StageContext, StageOutcome};
use crate::error::{PipelineError, Result, Tool};
use crate::invoker::InvocationSpec;
use crate::paths::join_classpath;

/// AspectJ compiler entry point, run on the JDK's `java` launcher.
const AJC_MAIN: &str = "org.aspectj.tools.ajc.Main";

/// Runtime jar name inside `tmp/woven/libs/`.
const RUNTIME_JAR: &str = "aspectjrt.jar";

/// Weave recipe aspects into `tmp/code`, writing `tmp/woven`.
pub struct Weave;

impl PipelineStage for Weave {
    fn stage(&self) -> Stage {
        Stage::Weave
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        let woven = ctx.workspace.woven();
        let level = &ctx.settings.java_level;

        let mut classpath = ctx.toolchain.aspectj_jars()?;
        classpath.extend(ctx.toolchain.platform_jars()?);

        let ajc = InvocationSpec::new(Stage::Weave, Tool::Ajc, ctx.toolchain.program(Tool::Ajc)?)
            .arg("-classpath")
            .arg(join_classpath(&classpath)?)
            .arg(AJC_MAIN)
            .arg("-sourceroots")
            .arg(ctx.recipe.aspects())
            .arg("-inpath")
            .arg(ctx.workspace.code())
            .arg("-d")
            .arg(&woven)
            .arg("-source")
            .arg(level)
            .arg("-target")
            .arg(level)
            .arg("-Xlint:ignore");
        ctx.run_tool(ajc, &mut outcome)?;
        info!(woven = %woven.display(), "wove aspect files");

        // The woven classes reference the AspectJ runtime, so it ships with them.
        let runtime = ctx.toolchain.aspectj_runtime()?;
        let libs = woven.join("libs");
        fs::create_dir_all(&libs)
            .map_err(|e| PipelineError::io(format!("creating '{}'", libs.display()), e))?;
        let target = libs.join(RUNTIME_JAR);
        fs::copy(&runtime, &target).map_err(|e| {
            PipelineError::io(
                format!("copying '{}' -> '{}'", runtime.display(), target.display()),
                e,
            )
        })?;
        info!(runtime = %target.display(), "bundled aspect runtime");

        Ok(outcome)
    }
}
