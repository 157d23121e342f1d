//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! This runner orchestrates named app processes and cleanup functions, providing:
//! - Concurrent execution of every process on the tokio runtime
//! - Graceful shutdown on SIGTERM/SIGINT or on the first failing process
//! - A drain timeout for processes that are slow to observe cancellation
//! - Closers that always run, bounded by their own timeout
//!
//! # Example
//!
//! ```no_run
//! use thingflow_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let code = Runner::new()
//!         .with_named_process("worker", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//!
//!     std::process::exit(code);
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// Type alias for a closer function.
/// Returns a future that resolves to Result<(), anyhow::Error>
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

/// A concurrent application runner that manages long-running processes with graceful shutdown.
///
/// - App processes run concurrently until one fails or a shutdown signal is received
/// - Remaining processes get `drain_timeout` to return after cancellation, then are aborted
/// - Closers execute afterward in registration order, regardless of process outcome
pub struct Runner {
    app_processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    drain_timeout: Duration,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Drain timeout: 10 seconds
    /// - Closer timeout: 10 seconds
    /// - No app processes or closers
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            drain_timeout: Duration::from_secs(10),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    /// Adds an anonymous app process. See [`Runner::with_named_process`].
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process-{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Adds an app process whose name appears in lifecycle logs.
    ///
    /// App processes run concurrently. If any process returns an error,
    /// all processes are cancelled and closers are executed.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers are executed sequentially, in the order they were added, after
    /// all app processes have stopped. A failing closer does not prevent the
    /// next one from running.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Time processes get to return after cancellation. Default is 10 seconds.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the timeout for executing all closers. Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disable SIGINT/SIGTERM handling, leaving shutdown to the cancellation token.
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    /// Runs all app processes and waits for completion or shutdown signal.
    ///
    /// Returns [`EXIT_OK`] unless a process failed or panicked, in which case
    /// [`EXIT_FAILURE`] is returned. The caller decides whether to exit.
    pub async fn run(self) -> i32 {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.app_processes {
            let process_token = token.clone();
            tracing::info!(process = %name, "starting app process");
            join_set.spawn(async move {
                let result = process(process_token).await;
                (name, result)
            });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut failed = false;
        tokio::select! {
            _ = token.cancelled() => {}
            _ = async {
                while let Some(joined) = join_set.join_next().await {
                    if record_exit(joined, &token) {
                        failed = true;
                    }
                    if token.is_cancelled() {
                        break;
                    }
                }
            } => {}
        }

        if !token.is_cancelled() {
            // every process returned on its own
            token.cancel();
        }

        tracing::info!(
            remaining = join_set.len(),
            drain_timeout = ?self.drain_timeout,
            "draining app processes"
        );
        let drained = tokio::time::timeout(self.drain_timeout, async {
            let mut drain_failed = false;
            while let Some(joined) = join_set.join_next().await {
                if record_exit(joined, &token) {
                    drain_failed = true;
                }
            }
            drain_failed
        })
        .await;

        match drained {
            Ok(drain_failed) => failed |= drain_failed,
            Err(_) => {
                tracing::warn!(
                    remaining = join_set.len(),
                    "app processes did not stop within drain timeout, aborting"
                );
                join_set.shutdown().await;
            }
        }

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);

            match tokio::time::timeout(self.closer_timeout, run_closers(self.closers)).await {
                Ok(()) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        if failed {
            tracing::error!("Application exiting with error");
            EXIT_FAILURE
        } else {
            tracing::info!("Application exiting normally");
            EXIT_OK
        }
    }
}

/// Logs a finished process and cancels the shared token on failure.
/// Returns true when the process failed.
fn record_exit(
    joined: Result<(String, Result<(), anyhow::Error>), tokio::task::JoinError>,
    token: &CancellationToken,
) -> bool {
    match joined {
        Ok((name, Ok(()))) => {
            tracing::debug!(process = %name, "app process completed");
            false
        }
        Ok((name, Err(err))) => {
            tracing::error!(process = %name, "App process error: {:#}", err);
            token.cancel();
            true
        }
        Err(err) => {
            tracing::error!("App process panicked: {}", err);
            token.cancel();
            true
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let signal_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = signal_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::info!("Received shutdown signal");
                    signal_token.cancel();
                }
                Err(err) => tracing::error!("Error setting up signal handler: {}", err),
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                tracing::error!("Error setting up SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
                token.cancel();
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>) {
    for closer in closers {
        match closer().await {
            Ok(()) => tracing::debug!("Closer completed successfully"),
            Err(err) => tracing::error!("Closer error: {:#}", err),
        }
    }
}
