// Real browsers through the Playwright driver
//
// Each harness page is its own BrowserContext with one Page. Element
// snapshots come from a single evalOnSelectorAll round trip; actions are
// forwarded to the frame with `force` set, because actionability has
// already been established by the executor.

use crate::actions::Action;
use crate::backend::{BrowserBackend, ElementState, LoadState, PageBackend};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::events::{Download, PageEvent};
use crate::selector::Selector;
use crate::server::DriverProcess;
use crate::server::connection::{Connection, Event};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;
const LOAD_STATE_POLL: Duration = Duration::from_millis(50);

/// Serializes one snapshot per matched element. Form-control fields follow
/// a label to its control.
const SNAPSHOT_JS: &str = r#"(elements) => JSON.stringify(elements.map((el) => {
  const control = el.tagName === 'LABEL' && el.control ? el.control : el;
  const tag = el.tagName.toLowerCase();
  const ctag = control.tagName.toLowerCase();
  const inputType = ctag === 'input' ? (control.getAttribute('type') || 'text').toLowerCase() : null;
  const style = window.getComputedStyle(el);
  const rect = el.getBoundingClientRect();
  const visible = el.isConnected && rect.width > 0 && rect.height > 0 && style.visibility !== 'hidden';
  const disabled = control.getAttribute('aria-disabled') === 'true' || control.matches(':disabled');
  const nonText = ['checkbox', 'radio', 'button', 'submit', 'reset', 'file', 'image', 'range', 'color', 'hidden'];
  const editable = !disabled && !control.readOnly && (
    ctag === 'textarea' ||
    (ctag === 'input' && !nonText.includes(inputType)) ||
    control.isContentEditable);
  let obscured = false;
  if (visible) {
    const hit = document.elementFromPoint(rect.x + rect.width / 2, rect.y + rect.height / 2);
    obscured = hit !== null && hit !== el && !el.contains(hit);
  }
  const isCheckable = inputType === 'checkbox' || inputType === 'radio';
  const hasValue = ['input', 'textarea', 'select'].includes(ctag);
  return {
    tag,
    inputType,
    attached: el.isConnected,
    visible,
    enabled: !disabled,
    editable,
    checked: isCheckable ? control.checked : null,
    multiple: !!control.multiple,
    value: hasValue ? control.value : null,
    innerText: el.innerText ?? el.textContent ?? '',
    textContent: el.textContent ?? '',
    attributes: Object.fromEntries([...el.attributes].map((a) => [a.name, a.value])),
    boundingBox: visible ? { x: rect.x, y: rect.y, width: rect.width, height: rect.height } : null,
    obscured,
    options: ctag === 'select'
      ? [...control.options].map((o) => ({ value: o.value, label: o.label || o.text, selected: o.selected }))
      : [],
  };
}))"#;

fn millis(timeout: Duration) -> f64 {
    timeout.as_millis() as f64
}

fn guid_at<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    value[key]["guid"]
        .as_str()
        .ok_or_else(|| Error::Protocol(format!("response missing '{}.guid'", key)))
}

/// A browser launched through the Playwright driver
pub struct PlaywrightBrowser {
    driver: tokio::sync::Mutex<Option<DriverProcess>>,
    connection: Arc<Connection>,
    browser: String,
}

impl PlaywrightBrowser {
    /// Starts the driver and launches the configured browser.
    ///
    /// # Errors
    ///
    /// - `Error::DriverNotFound` if no Playwright driver is installed
    /// - `Error::LaunchFailed` if the driver or the browser fails to start
    pub async fn launch(config: &HarnessConfig) -> Result<Arc<Self>> {
        let driver = DriverProcess::launch().await?;
        let connection = Arc::clone(driver.connection());
        match Self::launch_browser(&connection, config).await {
            Ok(browser) => {
                tracing::info!("Launched {} (headless: {})", config.browser, config.headless);
                Ok(Arc::new(Self {
                    driver: tokio::sync::Mutex::new(Some(driver)),
                    connection,
                    browser,
                }))
            }
            Err(e) => {
                if let Err(shutdown) = driver.shutdown().await {
                    tracing::warn!("Driver shutdown after failed launch: {}", shutdown);
                }
                Err(e)
            }
        }
    }

    async fn launch_browser(connection: &Connection, config: &HarnessConfig) -> Result<String> {
        let playwright = connection.initialize(config.navigation_timeout).await?;
        let initializer = connection
            .object(&playwright)
            .map(|o| o.initializer)
            .unwrap_or_default();
        let browser_type = guid_at(&initializer, config.browser.as_str())
            .map_err(|_| {
                Error::LaunchFailed(format!("driver does not offer {}", config.browser))
            })?
            .to_string();

        let response = connection
            .send_message(&browser_type, "launch", config.launch_params())
            .await
            .map_err(|e| match e {
                Error::Protocol(message) => Error::LaunchFailed(message),
                other => other,
            })?;
        Ok(guid_at(&response, "browser")?.to_string())
    }
}

#[async_trait]
impl BrowserBackend for PlaywrightBrowser {
    async fn new_page(&self) -> Result<Arc<dyn PageBackend>> {
        let response = self
            .connection
            .send_message(&self.browser, "newContext", json!({}))
            .await?;
        let context = guid_at(&response, "context")?.to_string();
        let response = self
            .connection
            .send_message(&context, "newPage", json!({}))
            .await?;
        let page = guid_at(&response, "page")?.to_string();

        let page_object = self
            .connection
            .wait_for_object(&page, Duration::from_secs(5))
            .await?;
        let frame = guid_at(&page_object.initializer, "mainFrame")?.to_string();
        let frame_object = self.connection.object(&frame);

        Ok(RemotePage::new(
            Arc::clone(&self.connection),
            context,
            page,
            frame,
            frame_object.map(|o| o.initializer).unwrap_or_default(),
        ))
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self
            .connection
            .send_message(&self.browser, "close", json!({}))
            .await
        {
            tracing::warn!("Browser close failed: {}", e);
        }
        match self.driver.lock().await.take() {
            Some(driver) => driver.shutdown().await,
            None => Ok(()),
        }
    }
}

struct PageShared {
    url: Mutex<String>,
    load_states: Mutex<HashSet<String>>,
    closed: AtomicBool,
    events: broadcast::Sender<PageEvent>,
}

impl PageShared {
    fn has_load_state(&self, state: LoadState) -> bool {
        self.load_states.lock().contains(state.as_str())
    }
}

/// One Playwright page in its own context
pub struct RemotePage {
    connection: Arc<Connection>,
    context: String,
    page: String,
    frame: String,
    shared: Arc<PageShared>,
    pump: JoinHandle<()>,
}

impl RemotePage {
    fn new(
        connection: Arc<Connection>,
        context: String,
        page: String,
        frame: String,
        frame_initializer: Value,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let load_states = frame_initializer["loadStates"]
            .as_array()
            .map(|states| {
                states
                    .iter()
                    .filter_map(|s| s.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let shared = Arc::new(PageShared {
            url: Mutex::new(
                frame_initializer["url"]
                    .as_str()
                    .unwrap_or("about:blank")
                    .to_string(),
            ),
            load_states: Mutex::new(load_states),
            closed: AtomicBool::new(false),
            events,
        });

        let pump = tokio::spawn(Self::pump(
            connection.subscribe(),
            page.clone(),
            frame.clone(),
            Arc::clone(&shared),
        ));

        Arc::new(Self {
            connection,
            context,
            page,
            frame,
            shared,
            pump,
        })
    }

    async fn pump(
        mut rx: broadcast::Receiver<Event>,
        page: String,
        frame: String,
        shared: Arc<PageShared>,
    ) {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!("Page event pump lagged, {} driver events dropped", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let published = if event.guid == frame {
                Self::frame_event(&event, &shared)
            } else if event.guid == page {
                Self::page_event(&event, &shared)
            } else {
                None
            };
            if let Some(published) = published {
                let closing = published == PageEvent::Closed;
                let _ = shared.events.send(published);
                if closing {
                    break;
                }
            }
        }
    }

    fn frame_event(event: &Event, shared: &PageShared) -> Option<PageEvent> {
        match event.method.as_str() {
            "navigated" if event.params.get("error").is_none() => {
                let url = event.params["url"].as_str()?.to_string();
                *shared.url.lock() = url.clone();
                Some(PageEvent::Navigated { url })
            }
            "loadstate" => {
                let mut states = shared.load_states.lock();
                if let Some(added) = event.params["add"].as_str() {
                    states.insert(added.to_string());
                }
                if let Some(removed) = event.params["remove"].as_str() {
                    states.remove(removed);
                }
                None
            }
            _ => None,
        }
    }

    fn page_event(event: &Event, shared: &PageShared) -> Option<PageEvent> {
        match event.method.as_str() {
            "download" => Some(PageEvent::Download(Download::new(
                event.params["url"].as_str().unwrap_or_default(),
                event.params["suggestedFilename"]
                    .as_str()
                    .unwrap_or_default(),
            ))),
            "close" => {
                shared.closed.store(true, Ordering::SeqCst);
                Some(PageEvent::Closed)
            }
            _ => None,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn navigation_error(url: &str, error: Error) -> Error {
        match error {
            Error::Protocol(message) => Error::NavigationError {
                url: url.to_string(),
                message,
            },
            Error::ChannelClosed => Error::SessionClosed,
            other => other,
        }
    }

    fn action_request(action: &Action) -> (&'static str, Value) {
        match action {
            Action::Click {
                button,
                click_count,
            } => ("click", json!({ "button": button, "clickCount": click_count })),
            Action::DoubleClick { button } => ("dblclick", json!({ "button": button })),
            Action::Hover => ("hover", json!({})),
            Action::Fill(value) => ("fill", json!({ "value": value })),
            Action::Press(key) => ("press", json!({ "key": key })),
            Action::SetChecked(true) => ("check", json!({})),
            Action::SetChecked(false) => ("uncheck", json!({})),
            Action::SelectOption(by) => ("selectOption", json!({ "options": [by.to_json()] })),
            Action::SetInputFiles(files) => (
                "setInputFiles",
                json!({ "payloads": files.iter().map(|f| f.to_json()).collect::<Vec<_>>() }),
            ),
        }
    }

    async fn history(&self, method: &str, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let url = self.shared.url.lock().clone();
        self.connection
            .send_message(
                &self.page,
                method,
                json!({ "timeout": millis(timeout), "waitUntil": LoadState::Load.as_str() }),
            )
            .await
            .map_err(|e| Self::navigation_error(&url, e))?;
        Ok(())
    }
}

impl Drop for RemotePage {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Maps driver failures of an action to harness errors
fn action_error(selector: &Selector, action: &Action, timeout: Duration, error: Error) -> Error {
    match error {
        Error::Protocol(message) if message.contains("strict mode violation") => {
            let count = message
                .split("resolved to ")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(2);
            Error::StrictModeViolation {
                selector: selector.to_string(),
                count,
            }
        }
        Error::Protocol(message) if message.contains("Timeout") => {
            Error::timeout(action.name(), timeout)
        }
        Error::Protocol(message) if message.contains("did not find some options") => {
            Error::InvalidInput(message)
        }
        Error::ChannelClosed => Error::SessionClosed,
        other => other,
    }
}

#[async_trait]
impl PageBackend for RemotePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        self.connection
            .send_message(
                &self.frame,
                "goto",
                json!({
                    "url": url,
                    "timeout": millis(timeout),
                    "waitUntil": LoadState::Load.as_str(),
                }),
            )
            .await
            .map_err(|e| Self::navigation_error(url, e))?;
        Ok(())
    }

    async fn go_back(&self, timeout: Duration) -> Result<()> {
        self.history("goBack", timeout).await
    }

    async fn go_forward(&self, timeout: Duration) -> Result<()> {
        self.history("goForward", timeout).await
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.shared.url.lock().clone())
    }

    async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        let response = self
            .connection
            .send_message(&self.frame, "title", json!({}))
            .await?;
        Ok(response["value"].as_str().unwrap_or_default().to_string())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let reached = async {
            while !self.shared.has_load_state(state) {
                tokio::time::sleep(LOAD_STATE_POLL).await;
            }
        };
        tokio::time::timeout(timeout, reached).await.map_err(|_| {
            Error::timeout(format!("waiting for load state {}", state.as_str()), timeout)
        })
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<ElementState>> {
        self.ensure_open()?;
        let response = self
            .connection
            .send_message(
                &self.frame,
                "evalOnSelectorAll",
                json!({
                    "selector": selector.render(),
                    "expression": SNAPSHOT_JS,
                    "isFunction": true,
                    "arg": { "value": { "v": "undefined" }, "handles": [] },
                }),
            )
            .await
            .map_err(|e| match e {
                Error::Protocol(message)
                    if message.contains("selector") || message.contains("Unexpected token") =>
                {
                    Error::InvalidInput(message)
                }
                Error::ChannelClosed => Error::SessionClosed,
                other => other,
            })?;
        let encoded = response["value"]["s"]
            .as_str()
            .ok_or_else(|| Error::Protocol("snapshot did not return a string".to_string()))?;
        Ok(serde_json::from_str(encoded)?)
    }

    async fn dispatch(&self, selector: &Selector, action: &Action, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let (method, mut params) = Self::action_request(action);
        params["selector"] = json!(selector.render());
        params["strict"] = json!(true);
        params["timeout"] = json!(millis(timeout));
        if !matches!(action, Action::SetInputFiles(_)) {
            params["force"] = json!(true);
        }
        tracing::trace!("Frame {} {} on {}", method, action.describe(), selector);
        self.connection
            .send_message(&self.frame, method, params)
            .await
            .map_err(|e| action_error(selector, action, timeout, e))?;
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.shared.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self
            .connection
            .send_message(&self.context, "close", json!({}))
            .await;
        let _ = self.shared.events.send(PageEvent::Closed);
        match result {
            Ok(_) | Err(Error::ChannelClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
