//! Preflight checks run before the pipeline touches the workspace.
//!
//! Resolves every executable and jar set the stages will need, so a missing
//! tool fails immediately with one message listing every problem instead of
//! several stages into a run.

use anyhow::{bail, Result};

use crate::error::Tool;
use crate::paths::Toolchain;

/// Check that every tool and jar set the pipeline uses can be resolved.
pub fn check_toolchain(toolchain: &Toolchain) -> Result<()> {
    let mut missing = Vec::new();

    for tool in Tool::ALL {
        if let Err(e) = toolchain.program(tool) {
            missing.push(format!("  {}: {}", tool, e));
        }
    }

    match toolchain.platform_jars() {
        Ok(jars) if jars.is_empty() => missing.push(format!(
            "  platform jars: none found in '{}'",
            toolchain
                .platform_dir()
                .map(|d| d.display().to_string())
                .unwrap_or_default()
        )),
        Ok(_) => {}
        Err(e) => missing.push(format!("  platform jars: {}", e)),
    }

    if let Err(e) = toolchain.aspectj_runtime() {
        missing.push(format!("  aspectj runtime: {}", e));
    }

    if !missing.is_empty() {
        bail!("Missing required tools:\n{}", missing.join("\n"));
    }
    Ok(())
}
