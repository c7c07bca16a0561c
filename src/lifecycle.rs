//! Process lifetime: the shutdown signal and the resources torn down after it.

use std::error::Error;
use std::future::Future;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub type CloseResult = Result<(), Box<dyn Error + Send + Sync>>;

type Closer = Box<dyn FnOnce() -> BoxFuture<'static, CloseResult> + Send>;

/// Owns the shutdown token and an ordered registry of closers.
///
/// Closers run in reverse registration order, so a resource registered after
/// its dependencies is released before them.
pub struct Lifecycle {
    shutdown: CancellationToken,
    closers: Vec<(&'static str, Closer)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            closers: Vec::new(),
        }
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn register<F, Fut>(&mut self, name: &'static str, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CloseResult> + Send + 'static,
    {
        self.closers.push((name, Box::new(move || Box::pin(close()))));
    }

    /// Cancel the token on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) {
        let token = self.shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            token.cancel();
        });
    }

    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }

    /// Release every registered resource, last-registered first. Errors are
    /// logged and do not stop the remaining closers.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while let Some((name, close)) = self.closers.pop() {
            match close().await {
                Ok(()) => info!("closed {name}"),
                Err(e) => error!("failed to close {name}: {e}"),
            }
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
