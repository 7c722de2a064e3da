//! # Application Shell
//!
//! The long-lived part of the overseer. The Shell owns all UI state ([`ShellState`]) and a
//! FIFO task queue; its [`Shell::run`] loop is the single execution context that state is
//! mutated from. Other contexts (the transfer listener, signal handlers, the coordinator)
//! hold a cloneable [`ShellHandle`] and marshal work onto the queue instead of touching
//! state directly.
//!
//! The process-wide Shell lives in a [`ShellSlot`]: installed on first launch, cleared again
//! when the Shell shuts down.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use crate::invariant_ppt::{assert_invariant, APPEND_ONLY_MESSAGES, SERIALIZED_SHELL_TASKS};
use crate::invocation::InvocationParameters;
use crate::message::Message;

pub mod state;

pub use state::{ShellState, ShutdownMode, TrackedApp};

/// Errors surfaced to contexts that talk to the Shell.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShellError {
    #[error("the shell has shut down")]
    Closed,
    #[error("the shell task failed before producing a result")]
    TaskFailed,
    #[error("a shell is already running in this process")]
    AlreadyRunning,
}

type Task = Box<dyn FnOnce(&mut ShellState) + Send + 'static>;

enum ShellTask {
    Run(Task),
    Shutdown,
}

/// The Shell's execution context: its state plus the receiving end of the task queue.
pub struct Shell {
    state: ShellState,
    rx: mpsc::UnboundedReceiver<ShellTask>,
    busy: bool,
}

/// Cloneable, thread-safe handle for scheduling work on a [`Shell`].
#[derive(Clone)]
pub struct ShellHandle {
    tx: mpsc::UnboundedSender<ShellTask>,
}

impl Shell {
    /// Creates a Shell and the first handle to it. Nothing runs until [`Shell::run`].
    pub fn new(mode: ShutdownMode) -> (Self, ShellHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shell = Self {
            state: ShellState::new(mode),
            rx,
            busy: false,
        };
        (shell, ShellHandle { tx })
    }

    pub fn shutdown_mode(&self) -> ShutdownMode {
        self.state.shutdown_mode()
    }

    /// Runs queued tasks one by one, in order, until the Shell shuts down.
    ///
    /// Tasks still queued at shutdown are dropped. Returns the final state.
    pub async fn run(mut self) -> ShellState {
        info!("Shell running (shutdown mode: {:?})", self.state.shutdown_mode());

        while let Some(task) = self.rx.recv().await {
            match task {
                ShellTask::Run(task) => self.execute(task),
                ShellTask::Shutdown => {
                    info!("Explicit shutdown requested");
                    self.state.request_shutdown();
                }
            }
            if self.state.should_exit() {
                break;
            }
        }

        self.rx.close();
        info!(
            "Shell stopped after {} invocation(s), {} message(s)",
            self.state.invocations_handled(),
            self.state.messages().len()
        );
        self.state
    }

    fn execute(&mut self, task: Task) {
        assert_invariant(!self.busy, SERIALIZED_SHELL_TASKS, Some("Shell"));
        self.busy = true;
        let before = self.state.messages().len();

        let state = &mut self.state;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || task(state))) {
            let reason = panic_reason(payload.as_ref());
            error!(target: "shell", "task panic: {}", reason);
            self.state
                .append_message(Message::error(format!("Internal error: {}", reason)));
        }

        assert_invariant(
            self.state.messages().len() >= before,
            APPEND_ONLY_MESSAGES,
            Some("Shell"),
        );
        self.busy = false;
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ShellHandle {
    /// Enqueues `f` on the Shell and returns immediately.
    pub fn dispatch<F>(&self, f: F) -> Result<(), ShellError>
    where
        F: FnOnce(&mut ShellState) + Send + 'static,
    {
        self.tx
            .send(ShellTask::Run(Box::new(f)))
            .map_err(|_| ShellError::Closed)
    }

    /// Enqueues `f` on the Shell and waits for its result.
    pub async fn invoke<F, R>(&self, f: F) -> Result<R, ShellError>
    where
        F: FnOnce(&mut ShellState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch(move |state| {
            let _ = reply_tx.send(f(state));
        })?;
        reply_rx.await.map_err(|_| {
            if self.tx.is_closed() {
                ShellError::Closed
            } else {
                ShellError::TaskFailed
            }
        })
    }

    /// Schedules `params` for handling on the Shell.
    pub fn handle_new_invocation(&self, params: InvocationParameters) -> Result<(), ShellError> {
        self.dispatch(move |state| state.handle_new_invocation(params))
    }

    /// Schedules `message` to be appended to the Shell's list. Never fails: if the Shell is
    /// gone, the message is logged instead.
    pub fn append_message(&self, message: Message) {
        let fallback = message.to_string();
        if self.dispatch(move |state| state.append_message(message)).is_err() {
            warn!("Shell closed, message not shown: {}", fallback);
        }
    }

    /// Schedules closing the most recently opened window.
    pub fn close_window(&self) -> Result<(), ShellError> {
        self.dispatch(ShellState::close_window)
    }

    /// Requests explicit shutdown. Tasks queued before this call still run.
    pub fn shutdown(&self) {
        if self.tx.send(ShellTask::Shutdown).is_err() {
            debug!("Shutdown requested for a shell that already stopped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Process-wide slot for the one running Shell.
///
/// Passed around by reference (`Arc<ShellSlot>`); holds the Shell's handle from installation
/// until the Shell is torn down.
pub struct ShellSlot {
    current: watch::Sender<Option<ShellHandle>>,
}

impl Default for ShellSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellSlot {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self { current }
    }

    /// Installs `handle` unless a Shell is already installed.
    pub fn install(&self, handle: ShellHandle) -> Result<(), ShellError> {
        let installed = self.current.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(handle);
            true
        });
        if installed {
            Ok(())
        } else {
            Err(ShellError::AlreadyRunning)
        }
    }

    /// Handle of the installed Shell, if any.
    pub fn current(&self) -> Option<ShellHandle> {
        self.current.borrow().clone()
    }

    /// Waits until a Shell is installed.
    pub async fn wait_ready(&self) -> Option<ShellHandle> {
        let mut rx = self.current.subscribe();
        let ready = rx.wait_for(Option::is_some).await.ok()?;
        ready.clone()
    }

    /// Removes the installed Shell's handle.
    pub fn clear(&self) -> Option<ShellHandle> {
        self.current.send_replace(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invariant_ppt::contract_test;

    #[tokio::test]
    async fn tasks_run_in_order() {
        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        let running = tokio::spawn(shell.run());

        for i in 0..5 {
            handle.append_message(Message::info(format!("m{}", i)));
        }
        let texts = handle
            .invoke(|s| s.messages().iter().map(|m| m.text.clone()).collect::<Vec<_>>())
            .await
            .unwrap();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);

        handle.shutdown();
        let state = running.await.unwrap();
        assert_eq!(state.messages().len(), 5);
        contract_test("shell task loop", &[SERIALIZED_SHELL_TASKS, APPEND_ONLY_MESSAGES]);
    }

    #[tokio::test]
    async fn explicit_mode_survives_closing_last_window() {
        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        let running = tokio::spawn(shell.run());

        handle.append_message(Message::info("shown"));
        handle.close_window().unwrap();
        let windows = handle.invoke(|s| s.open_windows()).await.unwrap();
        assert_eq!(windows, 0);
        assert!(!running.is_finished());

        handle.shutdown();
        running.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn last_window_mode_stops_on_close() {
        let (shell, handle) = Shell::new(ShutdownMode::OnLastWindowClose);
        let running = tokio::spawn(shell.run());

        handle.append_message(Message::info("shown"));
        handle.close_window().unwrap();
        let state = running.await.unwrap();
        assert_eq!(state.open_windows(), 0);
        assert_eq!(handle.invoke(|s| s.open_windows()).await, Err(ShellError::Closed));
    }

    #[tokio::test]
    async fn panicking_task_becomes_error_message() {
        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        let running = tokio::spawn(shell.run());

        let result = handle.invoke(|_| -> usize { panic!("boom") }).await;
        assert_eq!(result, Err(ShellError::TaskFailed));

        let errors = handle.invoke(|s| s.error_count()).await.unwrap();
        assert_eq!(errors, 1);
        let last = handle
            .invoke(|s| s.messages().last().map(|m| m.text.clone()))
            .await
            .unwrap();
        assert_eq!(last.as_deref(), Some("Internal error: boom"));

        handle.shutdown();
        running.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deploys_assets_on_a_multi_threaded_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let asset = dir.path().join("basic.vert");
        std::fs::write(&asset, b"#version 450").unwrap();
        let out = dir.path().join("out");
        let params = crate::invocation::parse_command_line_args([
            "--executable".to_string(), "app.exe".to_string(),
            "--output-dir".to_string(), out.display().to_string(),
            "--asset".to_string(), asset.display().to_string(),
        ])
        .unwrap();

        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        let running = tokio::spawn(shell.run());
        handle.handle_new_invocation(params).unwrap();

        let (deployed, errors) = handle
            .invoke(|s| (s.apps()[0].deployed.len(), s.error_count()))
            .await
            .unwrap();
        assert_eq!((deployed, errors), (1, 0));
        assert!(out.join("basic.vert").is_file());

        handle.shutdown();
        running.await.unwrap();
    }

    #[tokio::test]
    async fn append_after_shutdown_does_not_panic() {
        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        handle.shutdown();
        shell.run().await;

        handle.append_message(Message::error(""));
        assert_eq!(handle.dispatch(|_| {}), Err(ShellError::Closed));
    }

    #[tokio::test]
    async fn slot_holds_at_most_one_shell() {
        let slot = ShellSlot::new();
        let (_first_shell, first) = Shell::new(ShutdownMode::OnExplicitShutdown);
        let (_second_shell, second) = Shell::new(ShutdownMode::OnExplicitShutdown);

        assert!(slot.current().is_none());
        slot.install(first).unwrap();
        assert_eq!(slot.install(second.clone()), Err(ShellError::AlreadyRunning));
        assert!(slot.wait_ready().await.is_some());

        assert!(slot.clear().is_some());
        slot.install(second).unwrap();
    }
}
