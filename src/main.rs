use clap::Parser;
use readyprobe::config::{Overrides, ProbeConfig, DEFAULT_CONFIG_FILE};
use readyprobe::preflight::{check_executable, check_port_available, target_addr};
use readyprobe::signals::{exit_code_for, ShutdownSignal};
use readyprobe::{launch, ChildProcess, LaunchError, ReadinessError};
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitCode, ExitStatus};
use std::time::Duration;

/// Launch a service, wait until its process is running and its URL answers,
/// then exit or stay attached to it.
#[derive(Parser, Debug)]
#[command(name = "readyprobe", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// URL to probe (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// Service name used in messages (overrides config)
    #[arg(long)]
    service: Option<String>,

    /// Readiness timeout in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Pause between probes in milliseconds (overrides config)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Accept any HTTP status, not just 200
    #[arg(long)]
    allow_any_status: bool,

    /// Skip the "port already in use" check
    #[arg(long)]
    no_port_check: bool,

    /// Exit as soon as the service is ready, leaving it running
    #[arg(long)]
    exit_when_ready: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (process status changes, probe results)
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,

    /// Service command and arguments (overrides config)
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            name: self.service.clone(),
            url: self.url.clone(),
            timeout_secs: self.timeout,
            poll_interval_ms: self.poll_interval_ms,
            allow_any_status: self.allow_any_status,
            no_port_check: self.no_port_check,
            command: self.command.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "readyprobe=debug"
    } else if cli.quiet {
        "readyprobe=warn"
    } else {
        "readyprobe=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = ProbeConfig::load(&cli.config)?;
    config.apply_overrides(&cli.overrides());
    config.validate()?;

    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    let service = config.service.name.clone();
    let url = config.service.url.clone();
    let command = config.service.command.clone().unwrap_or_default();

    if config.preflight.check_port {
        let (host, port) = target_addr(&url)?;
        check_port_available(&host, port).await?;
    }
    if config.preflight.check_executable {
        check_executable(Path::new(&command), &service)?;
    }

    let mut shutdown = ShutdownSignal::install()?;
    let mut process = launch(&command, &config.service.args, &config.service.env)?;
    let grace = config.grace();
    let waiter = config.waiter();

    let outcome = tokio::select! {
        outcome = waiter.wait_for_http(&mut process, &url, &service) => outcome,
        signal = shutdown.recv() => {
            tracing::info!(%signal, "interrupted while waiting for readiness");
            process.stop(grace).await?;
            return Ok(ExitCode::from(exit_code_for(signal)));
        }
    };

    if let Err(e) = outcome {
        return Err(stop_then_report(process.stop(grace), e).await.into());
    }

    if cli.exit_when_ready {
        tracing::info!(pid = ?process.pid(), "leaving service running");
        return Ok(ExitCode::SUCCESS);
    }

    supervise(&mut process, &mut shutdown, grace).await
}

/// Run `stop` and hand back the readiness error. A failed stop is only logged.
async fn stop_then_report<F>(stop: F, error: ReadinessError) -> ReadinessError
where
    F: Future<Output = Result<Option<ExitStatus>, LaunchError>>,
{
    if let Err(e) = stop.await {
        tracing::warn!(error = %e, service = ?error.service(), "failed to stop service");
    }
    error
}

/// Stay attached to a ready service until it exits or we are told to stop.
async fn supervise(
    process: &mut ChildProcess,
    shutdown: &mut ShutdownSignal,
    grace: Duration,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    tokio::select! {
        status = process.wait() => {
            let code = status?.map(exit_code).unwrap_or(0);
            tracing::info!(code, "service exited");
            Ok(ExitCode::from(code))
        }
        signal = shutdown.recv() => {
            tracing::info!(%signal, "shutting down service");
            process.stop(grace).await?;
            Ok(ExitCode::from(exit_code_for(signal)))
        }
    }
}

/// Exit code to forward: the service's own code, or 128+N if it was killed by signal N.
fn exit_code(status: ExitStatus) -> u8 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code.clamp(0, 255) as u8,
        (None, Some(signal)) => 128u8.saturating_add(signal.clamp(0, 127) as u8),
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_trailing_command() {
        let cli = Cli::try_parse_from([
            "readyprobe",
            "--url",
            "http://127.0.0.1:4444/status",
            "--timeout",
            "10",
            "--",
            "chromedriver",
            "--port=4444",
        ])
        .unwrap();

        let overrides = cli.overrides();
        assert_eq!(overrides.url.as_deref(), Some("http://127.0.0.1:4444/status"));
        assert_eq!(overrides.timeout_secs, Some(10));
        assert_eq!(overrides.command, vec!["chromedriver", "--port=4444"]);
        assert_eq!(cli.config, PathBuf::from("readyprobe.toml"));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "readyprobe",
            "-c",
            "custom.toml",
            "--allow-any-status",
            "--no-port-check",
            "--exit-when-ready",
            "--service",
            "web server",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(cli.exit_when_ready);
        assert!(cli.verbose);
        let overrides = cli.overrides();
        assert!(overrides.allow_any_status);
        assert!(overrides.no_port_check);
        assert_eq!(overrides.name.as_deref(), Some("web server"));
        assert!(overrides.command.is_empty());
    }

    fn startup_timeout() -> ReadinessError {
        ReadinessError::StartupTimeout {
            service: "web server".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_stop_failure_keeps_readiness_error() {
        let failed_stop = async {
            Err::<Option<ExitStatus>, _>(LaunchError::Signal {
                pid: 4242,
                source: nix::errno::Errno::EPERM,
            })
        };

        let err = stop_then_report(failed_stop, startup_timeout()).await;

        assert_eq!(
            err.to_string(),
            "Could not start web server (or it crashed) after 2 seconds."
        );
    }

    #[tokio::test]
    async fn test_service_stopped_after_failed_wait() {
        let mut process = launch("sleep", &["30".to_string()], &Default::default()).unwrap();

        let err = stop_then_report(process.stop(Duration::from_secs(5)), startup_timeout()).await;

        assert!(matches!(err, ReadinessError::StartupTimeout { .. }));
        assert!(process.exit_status().is_some());
    }

    #[test]
    fn test_exit_code_forwarding() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        // Raw wait status: exit code lives in the high byte
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        // Killed by SIGTERM (15)
        assert_eq!(exit_code(ExitStatus::from_raw(15)), 143);
    }
}
