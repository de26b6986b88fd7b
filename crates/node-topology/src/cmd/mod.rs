//! Command layer - Entry points for the node topology operations

pub mod daemon;
pub mod query;

pub use daemon::run_daemon;
pub use query::run_cpu_model;
pub use query::run_diff;
pub use query::run_hint;
