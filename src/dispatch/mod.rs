//! # Dispatch
//!
//! The two ways a hook invocation reaches a plugin: [`query`] (synchronous,
//! first-match, returns a value) and [`emit`] (asynchronous broadcast, fire and
//! forget via the job queue, returns a listener count).

mod emit;
mod query;

pub use emit::emit;
pub use query::query;
