//! Playwright driver process and its JSON-RPC connection (internal)

#[doc(hidden)]
pub mod connection;
#[doc(hidden)]
pub mod driver;
#[doc(hidden)]
pub mod transport;

use crate::error::{Error, Result};
use connection::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use transport::PipeReceiver;

const STARTUP_GRACE: Duration = Duration::from_millis(100);
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

/// A running `cli.js run-driver` child with its connection pumped in the
/// background
pub struct DriverProcess {
    process: Child,
    connection: Arc<Connection>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for DriverProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverProcess")
            .field("pid", &self.process.id())
            .finish()
    }
}

impl DriverProcess {
    /// Starts the driver found by [`driver::find_driver`].
    ///
    /// # Errors
    ///
    /// - `Error::DriverNotFound` if no driver is installed
    /// - `Error::LaunchFailed` if the process cannot start or exits at once
    pub async fn launch() -> Result<Self> {
        let paths = driver::find_driver()?;
        tracing::debug!("Starting Playwright driver {}", paths.cli_js.display());

        let mut process = Command::new(&paths.node)
            .arg(&paths.cli_js)
            .arg("run-driver")
            .env("PW_LANG_NAME", "rust")
            .env("PW_LANG_NAME_VERSION", env!("CARGO_PKG_RUST_VERSION"))
            .env("PW_CLI_DISPLAY_VERSION", env!("CARGO_PKG_VERSION"))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LaunchFailed(format!("Failed to spawn driver: {}", e)))?;

        tokio::time::sleep(STARTUP_GRACE).await;
        if let Some(status) = process
            .try_wait()
            .map_err(|e| Error::LaunchFailed(format!("Failed to check driver status: {}", e)))?
        {
            return Err(Error::LaunchFailed(format!(
                "Driver exited immediately with status: {}",
                status
            )));
        }

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdin unavailable".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::LaunchFailed("driver stdout unavailable".to_string()))?;

        let (receiver, message_rx) = PipeReceiver::new(stdout);
        let connection = Arc::new(Connection::new(stdin, receiver, message_rx));
        let pumped = Arc::clone(&connection);
        let pump = tokio::spawn(async move {
            if let Err(e) = pumped.run().await {
                tracing::error!("Driver connection failed: {}", e);
            }
        });

        Ok(Self {
            process,
            connection,
            pump,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Kills the driver and waits briefly for it to exit
    pub async fn shutdown(mut self) -> Result<()> {
        self.pump.abort();
        #[cfg(windows)]
        {
            // stdio must be closed before kill or the wait can hang
            drop(self.process.stdin.take());
            drop(self.process.stdout.take());
        }
        self.process
            .kill()
            .await
            .map_err(|e| Error::LaunchFailed(format!("Failed to kill driver: {}", e)))?;
        match tokio::time::timeout(SHUTDOWN_WAIT, self.process.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::timeout("waiting for driver exit", SHUTDOWN_WAIT)),
        }
    }
}
