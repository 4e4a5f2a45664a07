//! Stop signals delivered to planners and schedulers

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

/// Why a worker was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignalType {
    None,
    /// A user cancelled the deployment
    Cancel,
    /// The deployment ran past its timeout
    Timeout,
    /// piped is shutting down; the deployment resumes after restart
    Terminate,
}

#[derive(Debug, Default)]
struct Inner {
    token: CancellationToken,
    kind: OnceLock<StopSignalType>,
}

/// Receiving side of a stop signal
#[derive(Debug, Clone)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

/// Sending side of a stop signal. The first signal wins.
#[derive(Debug, Clone)]
pub struct StopSignalHandler {
    inner: Arc<Inner>,
}

pub fn new_stop_signal() -> (StopSignal, StopSignalHandler) {
    let inner = Arc::new(Inner::default());
    (
        StopSignal {
            inner: inner.clone(),
        },
        StopSignalHandler { inner },
    )
}

impl StopSignal {
    /// Token cancelled once any signal was sent
    pub fn context(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Wait for a signal and return its kind
    pub async fn wait(&self) -> StopSignalType {
        self.inner.token.cancelled().await;
        self.signal()
    }

    /// The signal sent so far, `None` if there was none
    pub fn signal(&self) -> StopSignalType {
        self.inner
            .kind
            .get()
            .copied()
            .unwrap_or(StopSignalType::None)
    }

    pub fn terminated(&self) -> bool {
        self.signal() == StopSignalType::Terminate
    }
}

impl StopSignalHandler {
    pub fn cancel(&self) -> bool {
        self.send(StopSignalType::Cancel)
    }

    pub fn timeout(&self) -> bool {
        self.send(StopSignalType::Timeout)
    }

    pub fn terminate(&self) -> bool {
        self.send(StopSignalType::Terminate)
    }

    /// Returns whether this call was the one delivering the signal
    fn send(&self, kind: StopSignalType) -> bool {
        let won = self.inner.kind.set(kind).is_ok();
        if won {
            self.inner.token.cancel();
        }
        won
    }
}
