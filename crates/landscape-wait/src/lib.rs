//! landscape-wait — the single polling primitive of the landscape.
//!
//! Host boot, process readiness, master data import progress and content
//! comparison are all expressed as a [`wait`] on a supplier with a success
//! predicate. No other crate sleeps in a loop of its own.
//!
//! # Components
//!
//! - **`policy`** — `WaitPolicy` (timeout, interval, retry-on-error, attempt budget)
//! - **`retry`** — `wait` and the `WaitError` it returns

pub mod policy;
pub mod retry;

pub use policy::WaitPolicy;
pub use retry::{WaitError, WaitResult, wait};
