pub mod cli;
pub mod cluster;
pub mod daemon;
pub mod query;

pub use cli::*;
pub use cluster::*;
pub use daemon::*;
pub use query::*;
