//! Unix-socket daemon plumbing: state paths, a JSON-lines request server, a
//! blocking client, and background start/stop of the daemon process.

pub mod client;
pub mod daemon;
pub mod paths;
pub mod server;

#[cfg(feature = "clap")]
pub mod clap;

pub use client::{ClientError, DaemonClient};
pub use daemon::{Daemon, DaemonError};
pub use paths::DaemonPaths;
