//! Termination signals that end the tool.
//!
//! Any of these stops the running command: tracked children are killed and
//! the process exits with `128 + signal number`.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    /// Ctrl+C.
    Interrupt,
    /// Keyboard quit.
    Quit,
    /// `kill` without arguments.
    Terminate,
    User1,
    User2,
}

impl ExitSignal {
    pub fn label(self) -> &'static str {
        match self {
            ExitSignal::Interrupt => "SIGINT",
            ExitSignal::Quit => "SIGQUIT",
            ExitSignal::Terminate => "SIGTERM",
            ExitSignal::User1 => "SIGUSR1",
            ExitSignal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    pub fn number(self) -> i32 {
        match self {
            ExitSignal::Interrupt => libc::SIGINT,
            ExitSignal::Quit => libc::SIGQUIT,
            ExitSignal::Terminate => libc::SIGTERM,
            ExitSignal::User1 => libc::SIGUSR1,
            ExitSignal::User2 => libc::SIGUSR2,
        }
    }

    #[cfg(not(unix))]
    pub fn number(self) -> i32 {
        match self {
            ExitSignal::Interrupt => 2,
            ExitSignal::Quit => 3,
            ExitSignal::Terminate => 15,
            ExitSignal::User1 => 10,
            ExitSignal::User2 => 12,
        }
    }

    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }
}

/// Resolves with the first termination signal received.
///
/// Never resolves when the listeners cannot be installed.
pub async fn wait_for_exit_signal() -> ExitSignal {
    match listen().await {
        Ok(signal) => signal,
        Err(err) => {
            warn!("signal handling unavailable: {}", err);
            std::future::pending().await
        }
    }
}

#[cfg(unix)]
async fn listen() -> std::io::Result<ExitSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut user1 = signal(SignalKind::user_defined1())?;
    let mut user2 = signal(SignalKind::user_defined2())?;
    let received = tokio::select! {
        _ = interrupt.recv() => ExitSignal::Interrupt,
        _ = quit.recv() => ExitSignal::Quit,
        _ = terminate.recv() => ExitSignal::Terminate,
        _ = user1.recv() => ExitSignal::User1,
        _ = user2.recv() => ExitSignal::User2,
    };
    Ok(received)
}

#[cfg(not(unix))]
async fn listen() -> std::io::Result<ExitSignal> {
    tokio::signal::ctrl_c().await?;
    Ok(ExitSignal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_follows_shell_convention() {
        assert_eq!(ExitSignal::Interrupt.exit_code(), 130);
        assert_eq!(ExitSignal::Terminate.exit_code(), 143);
        assert_eq!(ExitSignal::Quit.label(), "SIGQUIT");
    }
}
