//! Logging setup shared by every binary and test harness of the oracle node.
//!
//! [`init`] installs a global `tracing` subscriber configured by a
//! [`LogConfig`], which is normally a section of the node configuration file.
mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput};
