use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{PipelineStage, Stage, StageContext, StageOutcome};
use crate::error::{PipelineError, Result, Tool};
use crate::invoker::InvocationSpec;
use crate::workspace::{merge_tree, package_into, replace_file};

/// Dex file name replaced inside the package.
const DEX_NAME: &str = "classes.dex";

/// Rebuild the APK from `staging/` around the woven classes, then sign and align.
pub struct Repackage;

impl PipelineStage for Repackage {
    fn stage(&self) -> Stage {
        Stage::Repackage
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();
        let ws = ctx.workspace;

        // 1. woven classes -> classes.dex
        let dex_file = ws.dex_file();
        let dx = InvocationSpec::new(Stage::Repackage, Tool::Dx, ctx.toolchain.program(Tool::Dx)?)
            .arg("--dex")
            .arg("--no-locals")
            .arg(format!("--min-sdk-version={}", ctx.settings.min_sdk_version))
            .arg("--output")
            .arg(&dex_file)
            .arg(ws.woven());
        ctx.run_tool(dx, &mut outcome)?;
        info!(dex = %dex_file.display(), "converted woven classes to dex");

        // 2. swap the package's dex for the new one
        replace_file(&dex_file, &ws.staging().join(DEX_NAME))?;

        // 3. overlay recipe libraries onto lib/
        merge_tree(&ctx.recipe.libraries(), &ws.staging().join("lib"))?;
        info!("copied library files");

        // 4. zip staging
        let unsigned = ws.unsigned_apk();
        package_into(&ws.staging(), &unsigned)?;
        info!(apk = %unsigned.display(), "packaged APK");

        // 5. sign in place
        let jarsigner = signer_invocation(ctx, &unsigned)?;
        ctx.run_tool(jarsigner, &mut outcome)?;
        info!(alias = %ctx.signing.alias, "signed APK");

        // 6. align into output/
        let artifact = ws.output().join(artifact_name(ctx)?);
        let zipalign = InvocationSpec::new(
            Stage::Repackage,
            Tool::Zipalign,
            ctx.toolchain.program(Tool::Zipalign)?,
        )
        .arg(ctx.settings.alignment.to_string())
        .arg(&unsigned)
        .arg(&artifact);
        ctx.run_tool(zipalign, &mut outcome)?;
        info!(apk = %artifact.display(), "aligned APK");

        outcome.artifact = Some(artifact);
        Ok(outcome)
    }
}

fn signer_invocation(ctx: &StageContext<'_>, unsigned: &Path) -> Result<InvocationSpec> {
    let settings = ctx.settings;
    let signing = ctx.signing;

    let mut spec = InvocationSpec::new(
        Stage::Repackage,
        Tool::Jarsigner,
        ctx.toolchain.program(Tool::Jarsigner)?,
    )
    .arg("-sigalg")
    .arg(&settings.signature_algorithm)
    .arg("-digestalg")
    .arg(&settings.digest_algorithm)
    .arg("-keystore")
    .arg(&signing.key_store)
    .arg("-storepass")
    .arg(&signing.store_password);
    if let Some(key_password) = &signing.alias_password {
        spec = spec.arg("-keypass").arg(key_password);
    }
    if let Some(tsa) = &settings.timestamp_authority {
        spec = spec.arg("-tsa").arg(tsa);
    }
    Ok(spec.arg(unsigned).arg(&signing.alias))
}

/// Final artifact keeps the input APK's file name.
fn artifact_name(ctx: &StageContext<'_>) -> Result<OsString> {
    ctx.input_apk
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| PipelineError::NotFound {
            what: "input package file name".to_string(),
            path: PathBuf::from(ctx.input_apk),
        })
}
