//! Process signals understood by a consumer session.

/// A signal relevant to a running consumer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionSignal {
    /// SIGINT or SIGTERM.
    Terminate,
    /// SIGUSR1.
    TogglePause,
}

#[cfg(unix)]
pub(crate) struct SessionSignals {
    termination: Option<(tokio::signal::unix::Signal, tokio::signal::unix::Signal)>,
    toggle: Option<tokio::signal::unix::Signal>,
}

#[cfg(unix)]
impl SessionSignals {
    /// Installs the SIGUSR1 listener when `pause` is set and the SIGINT and
    /// SIGTERM listeners when `terminate` is set.
    pub(crate) fn install(pause: bool, terminate: bool) -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        let termination = if terminate {
            Some((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            ))
        } else {
            None
        };
        let toggle = if pause {
            Some(signal(SignalKind::user_defined1())?)
        } else {
            None
        };
        Ok(Self {
            termination,
            toggle,
        })
    }

    pub(crate) async fn recv(&mut self) -> SessionSignal {
        let Self {
            termination,
            toggle,
        } = self;
        let termination = async {
            match termination {
                Some((interrupt, terminate)) => tokio::select! {
                    _ = interrupt.recv() => {}
                    _ = terminate.recv() => {}
                },
                None => std::future::pending().await,
            }
        };
        let toggle = async {
            match toggle {
                Some(toggle) => {
                    toggle.recv().await;
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            _ = termination => SessionSignal::Terminate,
            _ = toggle => SessionSignal::TogglePause,
        }
    }
}

// Only Ctrl+C is available elsewhere; pausing is left to the controller.
#[cfg(not(unix))]
pub(crate) struct SessionSignals {
    terminate: bool,
}

#[cfg(not(unix))]
impl SessionSignals {
    pub(crate) fn install(_pause: bool, terminate: bool) -> std::io::Result<Self> {
        Ok(Self { terminate })
    }

    pub(crate) async fn recv(&mut self) -> SessionSignal {
        if self.terminate && tokio::signal::ctrl_c().await.is_ok() {
            return SessionSignal::Terminate;
        }
        std::future::pending().await
    }
}
