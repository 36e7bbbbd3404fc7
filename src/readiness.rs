//! Wait for a launched service to be alive and answering HTTP.
//!
//! Each iteration checks the process first and only probes HTTP while the
//! process is `Started`. Failed iterations sleep a fixed `poll_interval` and
//! retry until the wall-clock deadline passes. The deadline is checked after
//! each unsuccessful attempt, so one attempt may still be made at or past the
//! deadline, and a slow request can overrun it by up to one request.
use crate::clock::{Clock, TokioClock};
use crate::error::{ProbeFailure, ReadinessError};
use crate::probe::{HttpGet, ReqwestProbe};
use crate::process::{ProcessHandle, ProcessStatus};
use std::time::Duration;
use tokio::time::Instant;

/// Default overall timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between iterations.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Result of one loop iteration.
#[derive(Debug)]
enum ProbeOutcome {
    Success,
    HttpFailure(ProbeFailure),
    ProcessFailure(ProcessStatus),
}

/// Polls a process and an HTTP endpoint until both say the service is ready.
#[derive(Debug, Clone)]
pub struct ReadinessWaiter<C = TokioClock> {
    timeout: Duration,
    poll_interval: Duration,
    allow_any_status: bool,
    clock: C,
}

impl ReadinessWaiter<TokioClock> {
    pub fn new() -> Self {
        Self::with_clock(TokioClock)
    }
}

impl Default for ReadinessWaiter<TokioClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ReadinessWaiter<C> {
    /// Waiter with default settings reading time from `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            allow_any_status: false,
            clock,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Accept any HTTP status instead of requiring 200.
    pub fn allow_any_status(mut self, allow: bool) -> Self {
        self.allow_any_status = allow;
        self
    }

    pub fn configured_timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `status` counts as ready.
    pub fn accepts(&self, status: u16) -> bool {
        self.allow_any_status || status == 200
    }

    /// Wait until `process` is started and `url` answers with an accepted status.
    ///
    /// `service` only appears in error messages. Cancel by dropping the future.
    pub async fn wait_until_ready<P, H>(
        &self,
        process: &mut P,
        http: &H,
        url: &str,
        service: &str,
    ) -> Result<(), ReadinessError>
    where
        P: ProcessHandle + ?Sized,
        H: HttpGet,
    {
        let started_at = self.clock.now();
        // Too large to represent: no deadline
        let deadline = started_at.checked_add(self.timeout);
        let mut attempts: u32 = 0;
        let mut last_status: Option<ProcessStatus> = None;

        tracing::debug!(
            service,
            url,
            timeout_ms = self.timeout.as_millis() as u64,
            allow_any_status = self.allow_any_status,
            "waiting for service readiness"
        );

        loop {
            let outcome = self
                .attempt(process, http, url, &mut attempts, &mut last_status)
                .await;

            match outcome {
                ProbeOutcome::Success => {
                    let elapsed = self.clock.now() - started_at;
                    tracing::info!(
                        service,
                        url,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "service is ready"
                    );
                    return Ok(());
                }
                ProbeOutcome::ProcessFailure(status) => {
                    if self.past(deadline) {
                        tracing::warn!(service, %status, "service process did not start in time");
                        return Err(ReadinessError::StartupTimeout {
                            service: service.to_string(),
                            timeout: self.timeout,
                        });
                    }
                }
                ProbeOutcome::HttpFailure(cause) => {
                    if self.past(deadline) {
                        tracing::warn!(service, url, attempts, %cause, "service did not answer in time");
                        return Err(ReadinessError::ProbeTimeout {
                            service: service.to_string(),
                            timeout: self.timeout,
                            cause,
                        });
                    }
                    tracing::trace!(service, url, attempts, %cause, "probe failed, retrying");
                }
            }

            self.clock.sleep(self.poll_interval).await;
        }
    }

    /// Same as [`wait_until_ready`](Self::wait_until_ready) with a reqwest
    /// client whose per-request timeout equals the overall timeout.
    pub async fn wait_for_http<P>(
        &self,
        process: &mut P,
        url: &str,
        service: &str,
    ) -> Result<(), ReadinessError>
    where
        P: ProcessHandle + ?Sized,
    {
        let http = ReqwestProbe::new(self.timeout)
            .map_err(|source| ReadinessError::Client { source })?;
        self.wait_until_ready(process, &http, url, service).await
    }

    fn past(&self, deadline: Option<Instant>) -> bool {
        deadline.is_some_and(|deadline| self.clock.now() >= deadline)
    }

    async fn attempt<P, H>(
        &self,
        process: &mut P,
        http: &H,
        url: &str,
        attempts: &mut u32,
        last_status: &mut Option<ProcessStatus>,
    ) -> ProbeOutcome
    where
        P: ProcessHandle + ?Sized,
        H: HttpGet,
    {
        let status = process.status();
        if *last_status != Some(status) {
            tracing::debug!(%status, "service process status");
            *last_status = Some(status);
        }
        if !status.is_started() {
            return ProbeOutcome::ProcessFailure(status);
        }

        *attempts += 1;
        match http.get(url).await {
            Ok(code) if self.accepts(code) => ProbeOutcome::Success,
            Ok(code) => ProbeOutcome::HttpFailure(ProbeFailure::Status(code)),
            Err(e) => ProbeOutcome::HttpFailure(ProbeFailure::Transport(e)),
        }
    }
}

/// Wait with the defaults: status 200 required, 30 second timeout.
pub async fn wait_until_ready<P, H>(
    process: &mut P,
    http: &H,
    url: &str,
    service: &str,
) -> Result<(), ReadinessError>
where
    P: ProcessHandle + ?Sized,
    H: HttpGet,
{
    ReadinessWaiter::new()
        .wait_until_ready(process, http, url, service)
        .await
}
