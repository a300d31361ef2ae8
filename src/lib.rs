//! Inject custom Java code and AspectJ aspects into an existing Android APK.
//!
//! The pipeline unpacks an APK, turns its dex payload back into JVM classes,
//! compiles a recipe's sources on top, weaves the recipe's aspects in, and
//! rebuilds a signed, aligned APK:
//!
//! ```text
//! app.apk ──Setup──> staging/ ──Decode──> decoded/ ──Compile──> tmp/code/
//!                                                                  │
//! output/app.apk <──Repackage── tmp/dex/classes.dex <── tmp/woven/ <─Weave
//! ```
//!
//! Every external tool (dex2jar, javac, ajc, dx, jarsigner, zipalign) is
//! reached through [`invoker::ToolInvoker`], and every path is derived from an
//! explicit [`paths::Toolchain`] and [`workspace::Workspace`]. Nothing in the
//! library reads environment variables.
//!
//! # Example
//!
//! ```rust,ignore
//! use apkweave::config::{discover_config_file, ConfigLayer};
//! use apkweave::invoker::ProcessInvoker;
//! use apkweave::pipeline::PipelineRunner;
//!
//! let config = ConfigLayer::default()
//!     .merge(discover_config_file(None, &cwd)?)
//!     .merge(ConfigLayer::defaults())
//!     .finish("app.apk".into(), "recipe".into())?;
//! let report = PipelineRunner::new(&ProcessInvoker).run(&config)?;
//! std::process::exit(report.exit_code());
//! ```

pub mod config;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod recipe;
pub mod run_manifest;
pub mod stages;
pub mod workspace;

pub use config::{BuildSettings, PipelineConfig, SigningConfig};
pub use error::{PipelineError, Tool};
pub use invoker::{InvocationSpec, ProcessInvoker, ToolInvoker};
pub use paths::Toolchain;
pub use pipeline::{PipelineReport, PipelineRunner, PipelineState};
pub use recipe::Recipe;
pub use stages::Stage;
pub use workspace::Workspace;
