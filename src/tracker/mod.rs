//! Task lifecycle tracking.
//!
//! `state` holds the pure lifecycle machine; `session` drives it against a
//! `TaskApi` on a timer and publishes a `SessionView` after each applied poll.

pub mod session;
pub mod state;

pub use session::{PollSession, SessionHandle};
pub use state::{Failure, LifecycleState, Next, PollPolicy, SessionOutcome, SessionView, TaskLifecycle};
