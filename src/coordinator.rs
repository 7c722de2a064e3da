//! # Instance Coordinator
//!
//! Decides what a launch means for the Shell. The process that won the single-instance race
//! builds the Shell and runs it for the rest of its lifetime ([`InstanceCoordinator::on_first_launch`]);
//! every later launch only forwards its arguments to that Shell
//! ([`InstanceCoordinator::on_subsequent_launch`]).
//!
//! Arguments are parsed here, right before delivery. A parse failure never escapes: it is
//! turned into exactly one error message on the Shell and the launch carries on.

use std::sync::Arc;
use anyhow::Result;
use log::{debug, info, warn};

use crate::instance::PrimaryInstance;
use crate::invariant_ppt::{assert_invariant, EXPLICIT_SHUTDOWN_ONLY, ONE_SHELL_PER_SCOPE};
use crate::invocation::parse_command_line_args;
use crate::message::Message;
use crate::shell::{Shell, ShellHandle, ShellSlot, ShutdownMode};

/// Routes invocations to the process-wide Shell held in a [`ShellSlot`].
pub struct InstanceCoordinator {
    slot: Arc<ShellSlot>,
}

impl InstanceCoordinator {
    pub fn new(slot: Arc<ShellSlot>) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &Arc<ShellSlot> {
        &self.slot
    }

    /// Builds the Shell, schedules delivery of `raw_args`, and runs the Shell until it is
    /// explicitly shut down.
    ///
    /// Always returns `false`: once the Shell has run, normal startup must not continue.
    pub async fn on_first_launch(&self, raw_args: Vec<String>) -> bool {
        let (shell, handle) = Shell::new(ShutdownMode::OnExplicitShutdown);
        assert_invariant(
            shell.shutdown_mode() == ShutdownMode::OnExplicitShutdown,
            EXPLICIT_SHUTDOWN_ONLY,
            Some("Coordinator"),
        );

        // Queued before anyone else can reach the Shell, so the launch's own arguments are
        // always handled first.
        if !raw_args.is_empty() {
            deliver(&handle, &raw_args);
        }

        let installed = self.slot.install(handle);
        assert_invariant(installed.is_ok(), ONE_SHELL_PER_SCOPE, Some("Coordinator"));
        if let Err(err) = installed {
            warn!("Not starting a second shell: {}", err);
            return false;
        }

        info!("First instance started");
        let state = shell.run().await;
        self.slot.clear();
        debug!(
            "Shell torn down ({} tracked app(s), {} error message(s))",
            state.apps().len(),
            state.error_count()
        );
        false
    }

    /// Forwards `raw_args` of a later launch to the running Shell.
    ///
    /// Returns as soon as the work is queued. Never builds a Shell.
    pub fn on_subsequent_launch(&self, raw_args: Vec<String>) {
        if raw_args.is_empty() {
            debug!("Subsequent launch without arguments; nothing to forward");
            return;
        }
        match self.slot.current() {
            // Still installed but already past its last task: teardown is under way.
            Some(handle) if handle.is_closed() => {
                warn!("Shell is shutting down; dropping invocation {:?}", raw_args)
            }
            Some(handle) => deliver(&handle, &raw_args),
            None => warn!("No running shell; dropping invocation {:?}", raw_args),
        }
    }

    /// Feeds every argument list transferred by a later process into
    /// [`InstanceCoordinator::on_subsequent_launch`], in arrival order.
    pub async fn serve_transfers(self: Arc<Self>, primary: PrimaryInstance) -> Result<()> {
        primary
            .on_transfer(move |raw_args| self.on_subsequent_launch(raw_args))
            .await
    }
}

/// Parses `raw_args` and queues the result on the Shell: the invocation itself, or one error
/// message describing why it could not be parsed.
fn deliver(handle: &ShellHandle, raw_args: &[String]) {
    match parse_command_line_args(raw_args) {
        Ok(params) => {
            debug!("Delivering invocation: {}", params.summary());
            if handle.handle_new_invocation(params).is_err() {
                warn!("Shell stopped before invocation {:?} could be delivered", raw_args);
            }
        }
        Err(err) => {
            warn!(target: "parse", "Malformed invocation {:?}: {}", raw_args, err.kind());
            handle.append_message(Message::from_error(&err));
        }
    }
}
