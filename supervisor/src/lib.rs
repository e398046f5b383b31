//! Lifecycle management for the simulator child process.
//!
//! The simulator runs as a child with piped stdio: commands go in on
//! stdin, markers come back on stdout, and the `get_mem_point` echo —
//! alone in the protocol — arrives on stderr. [`Vm`] owns that child:
//! spawning, the startup handshake (await `VM_STARTED`, then push the two
//! `modify_config` commands), the reader tasks, and the exit monitor that
//! flips the liveness flag. The flag is the sole source of truth for
//! liveness; [`VmLink::send`] fails fast with
//! [`SupervisorError::ProcessNotRunning`] once it is down, and an
//! unexpected exit is delivered in-band as [`VmMessage::Exited`] so a
//! waiting command observes death instead of hanging.
//!
//! [`VmLink`] is the seam the session layer is generic over; the
//! `debugger` crate's scripted VM implements it in memory for tests.

mod error;
mod link;
mod process;

pub use error::SupervisorError;
pub use link::{VmLink, VmMessage};
pub use process::{SpawnOptions, Vm};
