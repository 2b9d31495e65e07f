//! POSIX signal handling
//!
//! The stop signals and the verbose toggle are delivered as a single event
//! stream that the control loop selects against its sleeps. Handlers never
//! run user code; tokio's signal driver only marks readiness, so nothing
//! here touches a mutex or performs I/O at signal time.

use tokio::signal::unix::{signal, Signal, SignalKind};

/// A signal that requests graceful shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Quit,
    Terminate,
}

impl StopSignal {
    /// Conventional name, for the terminal log line
    pub fn name(self) -> &'static str {
        match self {
            StopSignal::Interrupt => "SIGINT",
            StopSignal::Quit => "SIGQUIT",
            StopSignal::Terminate => "SIGTERM",
        }
    }

    /// POSIX signal number
    pub fn number(self) -> i32 {
        match self {
            StopSignal::Interrupt => libc_number::SIGINT,
            StopSignal::Quit => libc_number::SIGQUIT,
            StopSignal::Terminate => libc_number::SIGTERM,
        }
    }
}

// Signal numbers are stable on every unix the daemon targets; avoid pulling
// a libc dependency for three constants.
mod libc_number {
    pub const SIGINT: i32 = 2;
    pub const SIGQUIT: i32 = 3;
    pub const SIGTERM: i32 = 15;
}

/// Event produced by [`Signals::recv`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// Graceful shutdown was requested
    Stop(StopSignal),
    /// `SIGUSR1`: toggle verbose logging on the next tick
    ToggleVerbose,
}

/// The daemon's installed signal streams
pub struct Signals {
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
    usr1: Signal,
}

impl Signals {
    /// Install handlers for the four signals the daemon reacts to.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
            usr1: signal(SignalKind::user_defined1())?,
        })
    }

    /// Wait for the next signal of interest.
    pub async fn recv(&mut self) -> SignalEvent {
        tokio::select! {
            _ = self.interrupt.recv() => SignalEvent::Stop(StopSignal::Interrupt),
            _ = self.quit.recv() => SignalEvent::Stop(StopSignal::Quit),
            _ = self.terminate.recv() => SignalEvent::Stop(StopSignal::Terminate),
            _ = self.usr1.recv() => SignalEvent::ToggleVerbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_signals_report_posix_numbers() {
        assert_eq!(StopSignal::Interrupt.number(), 2);
        assert_eq!(StopSignal::Quit.number(), 3);
        assert_eq!(StopSignal::Terminate.number(), 15);
    }

    #[test]
    fn stop_signals_report_conventional_names() {
        assert_eq!(StopSignal::Interrupt.name(), "SIGINT");
        assert_eq!(StopSignal::Quit.name(), "SIGQUIT");
        assert_eq!(StopSignal::Terminate.name(), "SIGTERM");
    }
}
