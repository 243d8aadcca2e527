//! # tether
//!
//! Process supervisor core.
//!
//! Launch configured apps, restart them when they die (within a bounded
//! budget), and append their stdout/stderr to log files. Each app is owned by
//! its own actor task; callers talk to it through [`Supervisor`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tether::{AppSpec, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let spec = AppSpec::new(
//! 	"web",
//! 	"/srv/web",
//! 	"/srv/web/.venv/bin/python3",
//! 	"/var/log/web-out.log",
//! 	"/var/log/web-error.log",
//! )
//! .with_args(["run.py"])
//! .with_restarts(5);
//!
//! let sup = Supervisor::new(SupervisorConfig::default(), vec![spec]).unwrap();
//! let state = sup.start("web").await.unwrap();
//! println!("web running as pid {:?}", state.pid);
//! sup.stop("web").await.unwrap();
//! # }
//! ```

mod actor;
pub mod env;
pub mod error;
pub mod output;
pub mod policy;
pub mod process;
pub mod supervisor;
pub mod types;

pub use error::{SpawnError, SupervisorError};
pub use output::OutputCapture;
pub use policy::{RestartDecision, RestartPolicy, RestartTracker};
pub use process::ProcessHandle;
pub use supervisor::{Supervisor, SupervisorConfig};
pub use types::*;
