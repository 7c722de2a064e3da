//! # Invocation Parameters
//!
//! Parses the raw argument list of one launch attempt. The launcher never looks at these
//! arguments itself: they are forwarded untouched (possibly to another process) and parsed
//! here, right before delivery to the Shell.

use std::path::{Path, PathBuf};
use clap::Parser;

/// Structured form of one invocation's command line.
///
/// Typical post-build call:
///
/// ```text
/// cgb-overseer --configuration Debug --platform x64 \
///     --executable build/hello_world.exe --output-dir build/assets --asset assets/models
/// ```
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(
    name = "cgb-overseer",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
pub struct InvocationParameters {
    /// Build configuration of the invoking application (e.g. Debug, Release).
    #[arg(long)]
    pub configuration: Option<String>,

    /// Target platform of the invoking application (e.g. x64).
    #[arg(long)]
    pub platform: Option<String>,

    /// Path of the invoking application's executable.
    #[arg(long, value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Path of the invoking application's project file.
    #[arg(long, value_name = "PATH")]
    pub project: Option<PathBuf>,

    /// Root directory that assets are deployed into.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Asset file or directory to deploy. May be repeated.
    #[arg(long = "asset", value_name = "PATH")]
    pub assets: Vec<PathBuf>,

    /// File to open in a view of the running overseer.
    #[arg(long, value_name = "FILE")]
    pub open: Option<PathBuf>,

    /// Ask the running overseer to shut down.
    #[arg(long)]
    pub shutdown: bool,
}

impl InvocationParameters {
    /// Key identifying the invoking application, if the invocation names one.
    ///
    /// The executable wins over the project file.
    pub fn app_key(&self) -> Option<&Path> {
        self.executable.as_deref().or(self.project.as_deref())
    }

    /// Short human-readable summary used in logs and messages.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(key) = self.app_key() {
            parts.push(format!("app {}", key.display()));
        }
        if let Some(config) = &self.configuration {
            parts.push(format!("{} build", config));
        }
        if !self.assets.is_empty() {
            parts.push(format!("{} asset path(s)", self.assets.len()));
        }
        if let Some(open) = &self.open {
            parts.push(format!("open {}", open.display()));
        }
        if self.shutdown {
            parts.push("shutdown".to_string());
        }
        if parts.is_empty() {
            "no-op invocation".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Parses a raw argument list (without the program name) into [`InvocationParameters`].
///
/// Unknown options, stray positional arguments and options missing their value are errors.
pub fn parse_command_line_args<I, S>(raw_args: I) -> Result<InvocationParameters, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<std::ffi::OsString> + Clone,
{
    InvocationParameters::try_parse_from(raw_args)
}
