//! The seam between the session layer and a running simulator.

use sentinel::{Command, Marker};
use tokio::sync::oneshot;

use crate::error::SupervisorError;

/// One message from the simulator, in stream order.
///
/// Exit notification travels in the same stream as markers so that a
/// command awaiting its sentinel observes process death as a message
/// rather than as a hang.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmMessage {
    Marker(Marker),
    /// The child is gone; carries its exit code when one was reported.
    Exited(Option<i32>),
}

/// Operations the session needs from a simulator connection.
///
/// [`Vm`](crate::Vm) implements this over a real child process; tests
/// implement it in memory. Methods take `&mut self`, which is what makes
/// the single-in-flight command discipline structural: a caller holding
/// the link exclusively cannot overlap two exchanges.
#[allow(async_fn_in_trait)]
pub trait VmLink {
    /// Ensure the simulator is running and configured. Idempotent while
    /// the process is up.
    async fn start(&mut self) -> Result<(), SupervisorError>;

    /// Liveness, as last reported by the exit monitor.
    fn is_running(&self) -> bool;

    /// Write one newline-terminated command to the simulator's stdin.
    ///
    /// Fails with [`SupervisorError::ProcessNotRunning`] when the process
    /// is down; a command is never silently dropped.
    async fn send(&mut self, command: Command) -> Result<(), SupervisorError>;

    /// Next message from the merged marker/exit stream. `None` once the
    /// process is gone and the stream is drained.
    async fn recv(&mut self) -> Option<VmMessage>;

    /// Arm the stderr echo slot for a `get_mem_point` request.
    ///
    /// The receiver resolves with the value once the simulator echoes
    /// `<address>[<value>]`. At most one watch may be armed at a time.
    fn watch_memory_point(
        &mut self,
        address: &str,
    ) -> Result<oneshot::Receiver<String>, SupervisorError>;

    /// Kill the child, wait for it to be reaped, and clear the handle.
    async fn stop(&mut self);
}
