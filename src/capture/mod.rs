//! Capture run lifecycle.
//!
//! The supervisor owns the single mutable resource of the service: the
//! external encoder process (stream mode) or the recurring snapshot task
//! (snapshot mode), together with the state machine governing it.

mod error;
mod supervisor;

pub use error::CaptureError;
pub use supervisor::{CaptureSupervisor, RunStatus};
