//! Shell state
//!
//! Everything the Shell owns on behalf of the user interface. A `ShellState` is only ever
//! touched from inside the Shell's task loop; other contexts go through `ShellHandle`.

use std::path::{Path, PathBuf};
use log::{error, info, warn};
use tokio::runtime::{Handle, RuntimeFlavor};

use crate::deploy::{self, DeploymentTarget, FileDeploymentRecord};
use crate::invocation::InvocationParameters;
use crate::message::{Message, MessageLevel};

/// How the Shell decides it is time to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Exit once the last open window is closed.
    OnLastWindowClose,
    /// Exit only on an explicit shutdown request.
    OnExplicitShutdown,
}

/// An application that has invoked the Shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedApp {
    /// Executable or project path; empty for invocations that named no application.
    pub key: PathBuf,
    pub configuration: Option<String>,
    pub platform: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub deployed: Vec<FileDeploymentRecord>,
}

impl TrackedApp {
    fn new(key: &Path) -> Self {
        Self {
            key: key.to_path_buf(),
            configuration: None,
            platform: None,
            output_dir: None,
            deployed: Vec::new(),
        }
    }

    /// Display label: the key's file name, or `(unnamed)`.
    pub fn label(&self) -> String {
        self.key
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "(unnamed)".to_string())
    }

    fn update_from(&mut self, params: &InvocationParameters) {
        if params.configuration.is_some() {
            self.configuration = params.configuration.clone();
        }
        if params.platform.is_some() {
            self.platform = params.platform.clone();
        }
        if params.output_dir.is_some() {
            self.output_dir = params.output_dir.clone();
        }
    }

    /// Replaces records for outputs that were deployed again, keeps the rest.
    fn merge_deployments(&mut self, records: Vec<FileDeploymentRecord>) {
        for record in records {
            match self
                .deployed
                .iter_mut()
                .find(|r| r.output_file == record.output_file)
            {
                Some(existing) => *existing = record,
                None => self.deployed.push(record),
            }
        }
    }
}

/// UI-owned state of the Shell.
#[derive(Debug)]
pub struct ShellState {
    mode: ShutdownMode,
    messages: Vec<Message>,
    messages_visible: bool,
    apps: Vec<TrackedApp>,
    history: Vec<InvocationParameters>,
    open_views: Vec<PathBuf>,
    invocations_handled: u64,
    shutdown_requested: bool,
    last_window_closed: bool,
}

impl ShellState {
    pub fn new(mode: ShutdownMode) -> Self {
        Self {
            mode,
            messages: Vec::new(),
            messages_visible: false,
            apps: Vec::new(),
            history: Vec::new(),
            open_views: Vec::new(),
            invocations_handled: 0,
            shutdown_requested: false,
            last_window_closed: false,
        }
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.mode
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn error_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_error()).count()
    }

    pub fn messages_visible(&self) -> bool {
        self.messages_visible
    }

    pub fn apps(&self) -> &[TrackedApp] {
        &self.apps
    }

    pub fn history(&self) -> &[InvocationParameters] {
        &self.history
    }

    pub fn open_views(&self) -> &[PathBuf] {
        &self.open_views
    }

    pub fn invocations_handled(&self) -> u64 {
        self.invocations_handled
    }

    /// Number of windows currently shown: one per open view, plus the message list.
    pub fn open_windows(&self) -> usize {
        self.open_views.len() + usize::from(self.messages_visible)
    }

    /// Appends a message and shows the message list. Never fails.
    pub fn append_message(&mut self, message: Message) {
        match message.level {
            MessageLevel::Error => error!(target: "messages", "{}", message.text),
            MessageLevel::Warning => warn!(target: "messages", "{}", message.text),
            MessageLevel::Info | MessageLevel::Success => info!(target: "messages", "{}", message.text),
        }
        self.messages.push(message);
        self.messages_visible = true;
    }

    /// Applies one parsed invocation.
    ///
    /// Repeating an invocation updates what it touched (app settings, deployment records)
    /// instead of duplicating it. Failures are reported as messages and never abort the
    /// remaining steps.
    pub fn handle_new_invocation(&mut self, params: InvocationParameters) {
        info!("Handling invocation: {}", params.summary());
        self.invocations_handled += 1;
        self.history.push(params.clone());

        let app_index = if params.app_key().is_some() || !params.assets.is_empty() {
            Some(self.upsert_app(&params))
        } else {
            None
        };

        if let Some(file) = &params.open {
            self.open_view(file);
        }

        if let Some(index) = app_index {
            if !params.assets.is_empty() {
                self.deploy_assets(index, &params);
            }
        }

        if params.shutdown {
            info!("Shutdown requested by invocation");
            self.request_shutdown();
        }
    }

    /// Closes the most recently opened window.
    pub fn close_window(&mut self) {
        let before = self.open_windows();
        if self.open_views.pop().is_none() {
            self.messages_visible = false;
        }
        if before > 0 && self.open_windows() == 0 {
            self.last_window_closed = true;
        }
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    /// Whether the task loop should stop after the current task.
    pub(crate) fn should_exit(&self) -> bool {
        self.shutdown_requested
            || (self.mode == ShutdownMode::OnLastWindowClose && self.last_window_closed)
    }

    fn upsert_app(&mut self, params: &InvocationParameters) -> usize {
        let key = params.app_key().unwrap_or(Path::new(""));
        let index = match self.apps.iter().position(|a| a.key == key) {
            Some(index) => index,
            None => {
                let app = TrackedApp::new(key);
                self.append_message(Message::info(format!("Now tracking {}", app.label())));
                self.apps.push(app);
                self.apps.len() - 1
            }
        };
        self.apps[index].update_from(params);
        index
    }

    fn open_view(&mut self, file: &Path) {
        if !self.open_views.iter().any(|v| v == file) {
            self.open_views.push(file.to_path_buf());
        }
        self.append_message(Message::info(format!("Opened {}", file.display())));
    }

    fn deploy_assets(&mut self, app_index: usize, params: &InvocationParameters) {
        let app = &self.apps[app_index];
        let target = DeploymentTarget {
            app: app.label(),
            configuration: app.configuration.clone(),
        };
        let Some(output_dir) = app.output_dir.clone() else {
            self.append_message(Message::error(format!(
                "Cannot deploy assets for {}: no output directory given",
                target
            )));
            return;
        };

        for asset in &params.assets {
            let outcome = run_blocking(|| deploy::deploy_asset(&target, asset, &output_dir));
            let written = outcome.records.len();
            let fresh = outcome.records.iter().filter(|r| r.up_to_date).count();
            // Files that made it to disk stay tracked even when the asset failed later on.
            self.apps[app_index].merge_deployments(outcome.records);

            match outcome.failure {
                Some(err) => {
                    error!(target: "deploy", "{} ({}): {:#}", asset.display(), target, err);
                    self.append_message(Message::from_error(&format!("{:#}", err)));
                }
                None if written == 0 => {
                    self.append_message(Message::warning(format!(
                        "Nothing to deploy in {} for {}",
                        asset.display(),
                        target
                    )));
                }
                None => {
                    self.append_message(Message::success(format!(
                        "Deployed {} for {}: {} file(s), {} already up to date",
                        asset.display(),
                        target,
                        written,
                        fresh
                    )));
                }
            }
        }
    }
}

/// Runs filesystem work inline, handing this worker's other tasks to the rest of the pool
/// first when on a multi-threaded runtime. `block_in_place` panics on a current-thread
/// runtime, so there (and outside any runtime) `work` simply runs.
fn run_blocking<R>(work: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn params(args: &[&str]) -> InvocationParameters {
        crate::invocation::parse_command_line_args(args).unwrap()
    }

    #[test]
    fn repeated_invocations_track_app_once() {
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(params(&["--executable", "bin/app.exe", "--configuration", "Debug"]));
        state.handle_new_invocation(params(&["--executable", "bin/app.exe", "--configuration", "Release"]));
        state.handle_new_invocation(params(&["--project", "other.vcxproj"]));

        assert_eq!(state.apps().len(), 2);
        assert_eq!(state.apps()[0].label(), "app.exe");
        assert_eq!(state.apps()[0].configuration.as_deref(), Some("Release"));
        assert_eq!(state.invocations_handled(), 3);
        assert_eq!(state.history().len(), 3);
    }

    #[test]
    fn open_adds_view_and_window() {
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(params(&["--open=foo.txt"]));
        state.handle_new_invocation(params(&["--open=foo.txt"]));

        assert_eq!(state.open_views(), &[PathBuf::from("foo.txt")]);
        assert_eq!(state.open_windows(), 2);
        assert_eq!(state.error_count(), 0);
    }

    #[test]
    fn assets_without_output_dir_report_one_error() {
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(params(&["--executable", "app.exe", "--asset", "models"]));
        assert_eq!(state.error_count(), 1);
        assert!(state.apps()[0].deployed.is_empty());
    }

    #[test]
    fn deploys_assets_and_merges_records() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        fs::create_dir_all(assets.join("shaders")).unwrap();
        fs::write(assets.join("shaders/basic.frag"), b"void main() {}").unwrap();
        let out = dir.path().join("out");

        let args = [
            "--executable".to_string(), "app.exe".to_string(),
            "--output-dir".to_string(), out.display().to_string(),
            "--asset".to_string(), assets.display().to_string(),
            "--asset".to_string(), dir.path().join("missing").display().to_string(),
        ];
        let invocation = crate::invocation::parse_command_line_args(&args).unwrap();

        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(invocation.clone());
        assert!(out.join("shaders/basic.frag").is_file());
        assert_eq!(state.error_count(), 1, "missing asset path is reported once");
        assert_eq!(state.apps()[0].deployed.len(), 1);

        state.handle_new_invocation(invocation);
        assert_eq!(state.apps()[0].deployed.len(), 1);
        assert!(state.apps()[0].deployed[0].up_to_date);
    }

    #[test]
    fn partly_failed_asset_keeps_written_files_tracked() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("assets");
        let out = dir.path().join("out");
        fs::create_dir_all(&assets).unwrap();
        fs::write(assets.join("a.txt"), b"a").unwrap();
        fs::write(assets.join("b.txt"), b"b").unwrap();
        fs::create_dir_all(out.join("b.txt")).unwrap();

        let args = [
            "--executable".to_string(), "app.exe".to_string(),
            "--output-dir".to_string(), out.display().to_string(),
            "--asset".to_string(), assets.display().to_string(),
        ];
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(crate::invocation::parse_command_line_args(&args).unwrap());

        assert!(out.join("a.txt").is_file());
        let deployed: Vec<_> = state.apps()[0].deployed.iter().map(|r| r.output_file.clone()).collect();
        assert_eq!(deployed, vec![out.join("a.txt")]);
        assert_eq!(state.error_count(), 1);
        assert!(!state.messages().iter().any(|m| m.level == MessageLevel::Success));
    }

    #[test]
    fn empty_asset_directory_warns_with_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let assets = dir.path().join("empty");
        fs::create_dir_all(&assets).unwrap();

        let args = [
            "--executable".to_string(), "app.exe".to_string(),
            "--configuration".to_string(), "Release".to_string(),
            "--output-dir".to_string(), dir.path().join("out").display().to_string(),
            "--asset".to_string(), assets.display().to_string(),
        ];
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.handle_new_invocation(crate::invocation::parse_command_line_args(&args).unwrap());

        let last = state.messages().last().unwrap();
        assert_eq!(last.level, MessageLevel::Warning);
        assert!(last.text.contains("app.exe (Release)"), "{}", last.text);
        assert_eq!(state.error_count(), 0);
    }

    #[test]
    fn explicit_mode_ignores_last_window_close() {
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.append_message(Message::info("hello"));
        state.close_window();
        assert_eq!(state.open_windows(), 0);
        assert!(!state.should_exit());

        state.handle_new_invocation(params(&["--shutdown"]));
        assert!(state.should_exit());
    }

    #[test]
    fn last_window_mode_exits_when_last_window_closes() {
        let mut state = ShellState::new(ShutdownMode::OnLastWindowClose);
        state.handle_new_invocation(params(&["--open", "a.txt"]));
        state.close_window();
        assert!(!state.should_exit(), "message list is still open");
        state.close_window();
        assert!(state.should_exit());
    }

    #[test]
    fn append_message_accepts_empty_text() {
        let mut state = ShellState::new(ShutdownMode::OnExplicitShutdown);
        state.append_message(Message::error(""));
        assert_eq!(state.messages().len(), 1);
        assert!(state.messages_visible());
    }
}
