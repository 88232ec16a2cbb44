// Harness and sessions
//
// A Harness owns one browser backend and hands out isolated sessions, one
// page each. Every session operation is serialized through an async mutex
// so program order holds even when the handle is shared.

use crate::backend::remote::PlaywrightBrowser;
use crate::backend::{BrowserBackend, LoadState, PageBackend};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::events::{Download, EventKind, PageEvent, PendingWait};
use crate::locator::Locator;
use crate::selector::{Selector, Strategy};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle of a [`Session`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

/// Launches browsers and opens sessions on them
#[derive(Clone)]
pub struct Harness {
    browser: Arc<dyn BrowserBackend>,
    config: HarnessConfig,
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness").field("config", &self.config).finish()
    }
}

impl Harness {
    /// Starts the Playwright driver and the configured browser.
    ///
    /// # Errors
    ///
    /// `Error::DriverNotFound` or `Error::LaunchFailed` when the browser
    /// cannot be started.
    pub async fn launch(config: HarnessConfig) -> Result<Self> {
        let browser = PlaywrightBrowser::launch(&config).await?;
        Ok(Self::with_backend(browser, config))
    }

    /// Wraps an existing backend, e.g. an in-memory browser
    pub fn with_backend(browser: Arc<dyn BrowserBackend>, config: HarnessConfig) -> Self {
        Self { browser, config }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Opens a fresh page with no state shared with other sessions
    pub async fn open(&self) -> Result<Session> {
        let inner = SessionInner {
            page: self.browser.new_page().await?,
            config: self.config.clone(),
            state: Mutex::new(SessionState::Unopened),
            last_action: Mutex::new(None),
            op_lock: tokio::sync::Mutex::new(()),
        };
        *inner.state.lock() = SessionState::Open;
        tracing::debug!("Session opened");
        Ok(Session {
            inner: Arc::new(inner),
        })
    }

    /// Runs `body` against a fresh session and closes the session however
    /// the body ends, panics included.
    pub async fn run_scenario<F, Fut>(&self, name: &str, body: F) -> ScenarioReport
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let started = Instant::now();
        tracing::info!("Scenario '{}' started", name);

        let session = match self.open().await {
            Ok(session) => session,
            Err(error) => {
                return ScenarioReport::new(name, Err(error), None, started.elapsed());
            }
        };

        let handle = session.clone();
        let result = match AssertUnwindSafe(async move { body(handle).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(Error::Panicked(panic_message(panic.as_ref()))),
        };

        let last_action = session.last_action();
        if let Err(e) = session.close().await {
            tracing::warn!("Closing session for scenario '{}' failed: {}", name, e);
        }

        let report = ScenarioReport::new(name, result, last_action, started.elapsed());
        match &report.outcome {
            Outcome::Passed => tracing::info!("Scenario '{}' passed in {:?}", name, report.elapsed),
            Outcome::Failed { diagnostic, .. } => {
                tracing::error!("Scenario '{}' failed: {}", name, diagnostic)
            }
        }
        report
    }

    /// Stops the browser and its driver
    pub async fn shutdown(&self) -> Result<()> {
        self.browser.shutdown().await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// How a scenario ended
#[derive(Debug)]
pub enum Outcome {
    Passed,
    Failed {
        error: Error,
        /// Error plus the last action performed
        diagnostic: String,
    },
}

/// Result of [`Harness::run_scenario`]
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub outcome: Outcome,
    pub last_action: Option<String>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    fn new(
        name: &str,
        result: Result<()>,
        last_action: Option<String>,
        elapsed: Duration,
    ) -> Self {
        let outcome = match result {
            Ok(()) => Outcome::Passed,
            Err(error) => {
                let diagnostic = match &last_action {
                    Some(action) => format!("{} (last action: {})", error, action),
                    None => error.to_string(),
                };
                Outcome::Failed { error, diagnostic }
            }
        };
        Self {
            name: name.to_string(),
            outcome,
            last_action,
            elapsed,
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }

    /// The scenario's error, if it failed
    pub fn into_result(self) -> Result<()> {
        match self.outcome {
            Outcome::Passed => Ok(()),
            Outcome::Failed { error, .. } => Err(error),
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Passed => write!(f, "{}: passed in {:?}", self.name, self.elapsed),
            Outcome::Failed { diagnostic, .. } => {
                write!(f, "{}: failed in {:?}: {}", self.name, self.elapsed, diagnostic)
            }
        }
    }
}

pub(crate) struct SessionInner {
    page: Arc<dyn PageBackend>,
    config: HarnessConfig,
    state: Mutex<SessionState>,
    last_action: Mutex<Option<String>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl SessionInner {
    pub(crate) fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        match *self.state.lock() {
            SessionState::Open => Ok(()),
            _ => Err(Error::SessionClosed),
        }
    }

    /// The page, once no other operation is running on it
    pub(crate) async fn acquire(&self) -> Result<(tokio::sync::MutexGuard<'_, ()>, &dyn PageBackend)> {
        let guard = self.op_lock.lock().await;
        self.ensure_open()?;
        Ok((guard, self.page.as_ref()))
    }

    pub(crate) fn record(&self, action: String) {
        tracing::debug!("Action: {}", action);
        *self.last_action.lock() = Some(action);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if *self.state.lock() != SessionState::Open {
            return;
        }
        tracing::warn!("Session dropped while open; closing it in the background");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let page = Arc::clone(&self.page);
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!("Background session close failed: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("No tokio runtime; the page stays open"),
        }
    }
}

/// One browser page, used by one scenario
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("last_action", &self.last_action())
            .finish()
    }
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn config(&self) -> &HarnessConfig {
        self.inner.config()
    }

    /// Description of the most recent action, for diagnostics
    pub fn last_action(&self) -> Option<String> {
        self.inner.last_action.lock().clone()
    }

    /// Navigates and waits for the page to load.
    ///
    /// # Errors
    ///
    /// `Error::NavigationError` when the target is unreachable or does not
    /// load within the navigation timeout.
    #[doc(alias = "navigate")]
    pub async fn goto(&self, url: &str) -> Result<()> {
        let (_guard, page) = self.inner.acquire().await?;
        self.inner.record(format!("goto {}", url));
        page.goto(url, self.inner.config.navigation_timeout).await
    }

    pub async fn go_back(&self) -> Result<()> {
        let (_guard, page) = self.inner.acquire().await?;
        self.inner.record("go_back".to_string());
        page.go_back(self.inner.config.navigation_timeout).await
    }

    pub async fn go_forward(&self) -> Result<()> {
        let (_guard, page) = self.inner.acquire().await?;
        self.inner.record("go_forward".to_string());
        page.go_forward(self.inner.config.navigation_timeout).await
    }

    pub async fn url(&self) -> Result<String> {
        let (_guard, page) = self.inner.acquire().await?;
        page.url().await
    }

    pub async fn title(&self) -> Result<String> {
        let (_guard, page) = self.inner.acquire().await?;
        page.title().await
    }

    pub async fn wait_for_load_state(&self, state: LoadState) -> Result<()> {
        let (_guard, page) = self.inner.acquire().await?;
        page.wait_for_load_state(state, self.inner.config.navigation_timeout)
            .await
    }

    /// Sleeps; prefer assertions, which wait only as long as needed
    pub async fn wait_for_timeout(&self, duration: Duration) -> Result<()> {
        self.inner.ensure_open()?;
        tokio::time::sleep(duration).await;
        Ok(())
    }

    /// Releases the page. Idempotent; later operations fail with
    /// `Error::SessionClosed`.
    pub async fn close(&self) -> Result<()> {
        let _guard = self.inner.op_lock.lock().await;
        {
            let mut state = self.inner.state.lock();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }
        tracing::debug!("Session closed");
        self.inner.page.close().await
    }

    /// Registers interest in the next event of `kind`. Register before the
    /// action that triggers the event.
    pub fn begin_wait(&self, kind: EventKind) -> Result<PendingWait> {
        self.inner.ensure_open()?;
        Ok(PendingWait::new(kind, self.inner.page.events()))
    }

    /// Runs `trigger` and returns the download it started.
    ///
    /// # Errors
    ///
    /// The trigger's own error (the wait is cancelled), or `Error::Timeout`
    /// when no download starts within the default timeout.
    pub async fn expect_download<F, Fut, T>(&self, trigger: F) -> Result<Download>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let wait = self.begin_wait(EventKind::Download)?;
        if let Err(e) = trigger().await {
            wait.cancel();
            return Err(e);
        }
        Self::into_download(wait.resolve(self.inner.config.default_timeout).await?)
    }

    /// Waits for the next download started after this call
    pub async fn wait_for_download(&self, timeout: Duration) -> Result<Download> {
        let wait = self.begin_wait(EventKind::Download)?;
        Self::into_download(wait.resolve(timeout).await?)
    }

    fn into_download(event: PageEvent) -> Result<Download> {
        match event {
            PageEvent::Download(download) => Ok(download),
            other => Err(Error::Protocol(format!(
                "expected a download event, got {:?}",
                other
            ))),
        }
    }

    /// Locator for a selector string; `css=`, `xpath=` and `text=` prefixes
    /// and `>>` chains are understood.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` for an empty or malformed selector.
    pub fn locator(&self, selector: &str) -> Result<Locator> {
        Ok(Locator::new(
            Arc::clone(&self.inner),
            Selector::parse(selector)?,
        ))
    }

    /// Locator for an explicit strategy
    pub fn locate(&self, strategy: Strategy) -> Locator {
        Locator::new(Arc::clone(&self.inner), Selector::new(strategy))
    }

    pub fn get_by_test_id(&self, id: &str) -> Locator {
        self.locate(Strategy::test_id(id))
    }

    /// Elements whose text contains `text` (case-insensitive), or equals it
    /// when `exact`
    pub fn get_by_text(&self, text: &str, exact: bool) -> Locator {
        self.locate(Strategy::text(text, exact))
    }

    /// Elements with an ARIA role and, optionally, an accessible name
    pub fn get_by_role(&self, role: &str, name: Option<&str>) -> Locator {
        self.locate(Strategy::role(role, name))
    }

    /// Like [`get_by_role`](Self::get_by_role) with an exact, case-sensitive name
    pub fn get_by_role_exact(&self, role: &str, name: &str) -> Locator {
        self.locate(Strategy::role_exact(role, name))
    }

    pub fn xpath(&self, expression: &str) -> Locator {
        self.locate(Strategy::xpath(expression))
    }
}
