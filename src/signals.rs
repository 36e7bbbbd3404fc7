/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM both cancel a pending readiness wait and stop
/// an attached service. Handlers are registered up front by `install()` so a
/// signal arriving before the first `recv()` is not lost.
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};

pub struct ShutdownSignal {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.interrupt.recv() => Signal::SIGINT,
            _ = self.terminate.recv() => Signal::SIGTERM,
        }
    }
}

/// Conventional shell exit code for a process ended by `signal`.
pub fn exit_code_for(signal: Signal) -> u8 {
    128u8.saturating_add(signal as i32 as u8)
}
