//! External tool invocation.
//!
//! Every shell-out in the pipeline goes through [`ToolInvoker`], so stages can
//! be exercised with a scripted double instead of real JDK/SDK binaries.

use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use crate::error::{PipelineError, Result, Tool};
use crate::stages::Stage;

/// Exit code reported by a finished external process.
pub type ExitCode = i32;

/// Default success predicate: exit code zero.
pub fn exit_ok(code: ExitCode) -> bool {
    code == 0
}

/// One external process call. Built per call and not mutated afterwards.
#[derive(Debug, Clone)]
pub struct InvocationSpec {
    pub stage: Stage,
    pub tool: Tool,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    pub succeeded: fn(ExitCode) -> bool,
}

impl InvocationSpec {
    pub fn new(stage: Stage, tool: Tool, program: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            tool,
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            succeeded: exit_ok,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Argument at `index` as lossy UTF-8, for assertions and logging.
    pub fn arg_str(&self, index: usize) -> Option<String> {
        self.args
            .get(index)
            .map(|a| a.to_string_lossy().into_owned())
    }

    /// Value following `flag`, e.g. the path after `-d`.
    pub fn flag_value(&self, flag: &str) -> Option<&OsStr> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(OsString::as_os_str)
    }

    /// Full command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Classify a finished process' exit code against this call's predicate.
    pub fn check(&self, code: ExitCode) -> Result<()> {
        if (self.succeeded)(code) {
            return Ok(());
        }
        Err(PipelineError::ToolFailure {
            stage: self.stage,
            tool: self.tool,
            exit_code: code,
        })
    }
}

/// Capability to run an external process to completion.
pub trait ToolInvoker {
    /// Run `spec` and return its exit code. Errors only when it cannot start.
    fn invoke(&self, spec: &InvocationSpec) -> Result<ExitCode>;

    /// Run `spec` and fail unless its success predicate accepts the exit code.
    fn run(&self, spec: &InvocationSpec) -> Result<()> {
        let code = self.invoke(spec)?;
        spec.check(code)
    }
}

/// Spawns real processes. Stdout is discarded, stderr passes through.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessInvoker;

impl ToolInvoker for ProcessInvoker {
    fn invoke(&self, spec: &InvocationSpec) -> Result<ExitCode> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }

        let status = cmd.status().map_err(|source| PipelineError::Spawn {
            stage: spec.stage,
            tool: spec.tool,
            program: spec.program.clone(),
            source,
        })?;
        Ok(exit_code(status))
    }
}

/// Exit code of a finished process; signal deaths map to `128 + signal`.
fn exit_code(status: ExitStatus) -> ExitCode {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_builder_preserves_argument_order() {
        let spec = InvocationSpec::new(Stage::Decode, Tool::Dex2Jar, "/tools/d2j-dex2jar.sh")
            .arg("-f")
            .arg("-o")
            .arg("/build/tmp/decoded.jar")
            .arg("/in/app.apk");

        assert_eq!(spec.arg_str(0).as_deref(), Some("-f"));
        assert_eq!(spec.flag_value("-o"), Some(OsStr::new("/build/tmp/decoded.jar")));
        assert_eq!(
            spec.display(),
            "/tools/d2j-dex2jar.sh -f -o /build/tmp/decoded.jar /in/app.apk"
        );
    }

    #[test]
    fn test_check_classifies_exit_codes() {
        let spec = InvocationSpec::new(Stage::Weave, Tool::Ajc, "java");
        assert!(spec.check(0).is_ok());

        let err = spec.check(3).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ToolFailure {
                stage: Stage::Weave,
                tool: Tool::Ajc,
                exit_code: 3
            }
        ));
    }

    #[test]
    fn test_custom_success_predicate() {
        let mut spec = InvocationSpec::new(Stage::Decode, Tool::AsmVerify, "verify");
        spec.succeeded = |code| code == 0 || code == 2;
        assert!(spec.check(2).is_ok());
        assert!(spec.check(1).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_reports_exit_code() {
        let spec = InvocationSpec::new(Stage::Repackage, Tool::Zipalign, "sh")
            .arg("-c")
            .arg("echo noisy; exit 7");
        let code = ProcessInvoker.invoke(&spec).unwrap();
        assert_eq!(code, 7);

        let err = ProcessInvoker.run(&spec).unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_invoker_success() {
        let spec = InvocationSpec::new(Stage::Repackage, Tool::Zipalign, "true");
        assert!(ProcessInvoker.run(&spec).is_ok());
    }

    #[test]
    fn test_process_invoker_missing_program() {
        let spec = InvocationSpec::new(
            Stage::Compile,
            Tool::Javac,
            "/definitely/not/a/real/javac_12345",
        );
        let err = ProcessInvoker.invoke(&spec).unwrap_err();
        assert!(matches!(err, PipelineError::Spawn { .. }));
    }
}
