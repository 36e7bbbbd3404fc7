//! Failures reported by the readiness loop.
use crate::probe::TransportError;
use std::fmt;
use std::time::Duration;

/// Why the last HTTP probe before the deadline was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The request could not be completed.
    Transport(TransportError),
    /// The service answered with a status that was not accepted.
    Status(u16),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Transport(e) => write!(f, "{e}"),
            ProbeFailure::Status(code) => write!(f, "Status code: {code}"),
        }
    }
}

/// Errors returned by `ReadinessWaiter::wait_until_ready`.
#[derive(Debug)]
pub enum ReadinessError {
    /// The process never reached `Started` (or crashed) before the deadline.
    StartupTimeout { service: String, timeout: Duration },
    /// The process ran but the HTTP probe never succeeded before the deadline.
    ProbeTimeout {
        service: String,
        timeout: Duration,
        cause: ProbeFailure,
    },
    /// The HTTP client could not be built.
    Client { source: TransportError },
}

impl ReadinessError {
    /// Name of the service the error is about, if any.
    pub fn service(&self) -> Option<&str> {
        match self {
            ReadinessError::StartupTimeout { service, .. }
            | ReadinessError::ProbeTimeout { service, .. } => Some(service),
            ReadinessError::Client { .. } => None,
        }
    }
}

impl fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessError::StartupTimeout { service, timeout } => write!(
                f,
                "Could not start {} (or it crashed) after {} seconds.",
                service,
                format_secs(*timeout)
            ),
            ReadinessError::ProbeTimeout {
                service,
                timeout,
                cause,
            } => write!(
                f,
                "Could not connect to {} after {} seconds ({}).",
                service,
                format_secs(*timeout),
                cause
            ),
            ReadinessError::Client { source } => {
                write!(f, "failed to create HTTP client: {}", source)
            }
        }
    }
}

impl std::error::Error for ReadinessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReadinessError::ProbeTimeout {
                cause: ProbeFailure::Transport(e),
                ..
            } => Some(e),
            ReadinessError::Client { source } => Some(source),
            _ => None,
        }
    }
}

/// Whole seconds print without a fraction ("30"), sub-second timeouts keep it ("0.25").
fn format_secs(d: Duration) -> String {
    if d.subsec_nanos() == 0 {
        d.as_secs().to_string()
    } else {
        d.as_secs_f64().to_string()
    }
}
