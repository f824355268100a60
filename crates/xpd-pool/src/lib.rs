//! Ordered parallel map used by xpd batch runners.
//!
//! The pool is an injected abstraction: callers hand over a function, the
//! items and a [`Workers`] setting, and get results back in input order.

mod map;
mod progress;
mod workers;

pub use map::map;
pub use progress::{progress_bar, NullProgress, Progress, RecordingProgress};
pub use workers::{chunk_size, Workers};
