//! Launch a service and wait until it is ready.
//!
//! A service counts as ready once its process is running and an HTTP GET to
//! its URL answers with status 200 (or any status, if configured). The
//! [`ReadinessWaiter`] polls both with a fixed short pause until a
//! wall-clock deadline passes.
//!
//! ```no_run
//! use readyprobe::{launch, ReadinessWaiter};
//! use std::collections::BTreeMap;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let args = vec!["-S".to_string(), "127.0.0.1:9080".to_string()];
//! let mut process = launch("php", &args, &BTreeMap::new())?;
//! ReadinessWaiter::new()
//!     .timeout(Duration::from_secs(10))
//!     .wait_for_http(&mut process, "http://127.0.0.1:9080", "web server")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod launch;
pub mod preflight;
pub mod probe;
pub mod process;
pub mod readiness;
pub mod signals;

pub use clock::{Clock, TokioClock};
pub use error::{ProbeFailure, ReadinessError};
pub use launch::{launch, LaunchError};
pub use probe::{HttpGet, ReqwestProbe, TransportError};
pub use process::{ChildProcess, ProcessHandle, ProcessStatus};
pub use readiness::{wait_until_ready, ReadinessWaiter};
