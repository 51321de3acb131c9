//! Resilient invocation of backend drivers.
//!
//! # Data Flow
//! ```text
//! Driver call:
//!     → invoker.rs (acquire permit, per-attempt timeout bounded by the deadline)
//!     → on Unavailable/Timeout: backoff.rs (exponential delay with jitter), retry
//!     → outcome.rs (one InvocationOutcome per call, sent to the OutcomeSink)
//! ```

pub mod backoff;
pub mod invoker;
pub mod outcome;

pub use backoff::calculate_backoff;
pub use invoker::{InvocationFailure, InvocationSettings, ResilientInvoker};
pub use outcome::{InvocationOutcome, OutcomeSink, OutcomeStatus, QueryOutcome, TracingSink};
