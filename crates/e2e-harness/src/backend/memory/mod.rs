// In-process browser
//
// Pages are built from a `Site`: a map from URL to a function that populates
// a fresh Document. Timers registered by those functions run on the tokio
// runtime and are discarded once the page has navigated elsewhere, so a
// delayed mutation never lands on the wrong document.

pub mod dom;
mod matcher;

pub use dom::{Document, DomEvent, Element, NodeId};

use crate::actions::{Action, MouseButton};
use crate::backend::{BrowserBackend, ElementState, LoadState, PageBackend};
use crate::error::{Error, Result};
use crate::events::{Download, PageEvent};
use crate::selector::Selector;
use async_trait::async_trait;
use dom::{Effect, Timer};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

type PageBuilder = Arc<dyn Fn(&mut Document) + Send + Sync>;

const EVENT_CAPACITY: usize = 64;
const IDLE_POLL: Duration = Duration::from_millis(10);

fn normalize_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// The pages a [`MemoryBrowser`] can navigate to
#[derive(Clone, Default)]
pub struct Site {
    pages: HashMap<String, PageBuilder>,
}

impl std::fmt::Debug for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Site")
            .field("pages", &self.pages.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `url`; `build` runs against an empty document on every load
    pub fn page<F>(mut self, url: &str, build: F) -> Self
    where
        F: Fn(&mut Document) + Send + Sync + 'static,
    {
        self.pages.insert(normalize_url(url), Arc::new(build));
        self
    }

    fn load(&self, url: &str) -> Option<Document> {
        let key = normalize_url(url);
        let builder = self.pages.get(&key);
        if builder.is_none() && key != "about:blank" {
            return None;
        }
        let mut doc = Document::new();
        doc.set_url(url);
        if let Some(build) = builder {
            build(&mut doc);
        }
        Some(doc)
    }
}

/// A browser whose pages live in memory
pub struct MemoryBrowser {
    site: Site,
    pages: Mutex<Vec<Arc<MemoryPage>>>,
    shut_down: AtomicBool,
}

impl MemoryBrowser {
    pub fn new(site: Site) -> Arc<Self> {
        Arc::new(Self {
            site,
            pages: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Pages handed out so far; closed ones are dropped when the next page opens
    pub fn pages(&self) -> Vec<Arc<MemoryPage>> {
        self.pages.lock().clone()
    }

    pub fn last_page(&self) -> Option<Arc<MemoryPage>> {
        self.pages.lock().last().cloned()
    }

    pub fn open_pages(&self) -> usize {
        self.pages.lock().iter().filter(|p| !p.is_closed()).count()
    }
}

#[async_trait]
impl BrowserBackend for MemoryBrowser {
    async fn new_page(&self) -> Result<Arc<dyn PageBackend>> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::LaunchFailed("browser has been shut down".to_string()));
        }
        let page = MemoryPage::new(self.site.clone());
        let mut pages = self.pages.lock();
        pages.retain(|p| !p.is_closed());
        pages.push(Arc::clone(&page));
        tracing::debug!("Opened in-memory page ({} open)", pages.len());
        Ok(page)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        let pages = self.pages();
        for page in pages {
            page.close().await?;
        }
        Ok(())
    }
}

struct PageState {
    doc: Document,
    history: Vec<String>,
    index: usize,
    /// Bumped on every load; timers from older loads are dropped
    generation: u64,
}

/// One in-memory page
pub struct MemoryPage {
    me: Weak<MemoryPage>,
    site: Site,
    state: Mutex<PageState>,
    events: broadcast::Sender<PageEvent>,
    load_delay: Mutex<Duration>,
    pending_timers: AtomicUsize,
    query_count: AtomicUsize,
    closed: AtomicBool,
}

impl std::fmt::Debug for MemoryPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPage")
            .field("url", &self.state.lock().doc.url())
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum HistoryMove {
    Push,
    /// Move to an existing history entry
    Traverse(usize),
}

impl MemoryPage {
    fn new(site: Site) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            site,
            state: Mutex::new(PageState {
                doc: Document::new(),
                history: vec!["about:blank".to_string()],
                index: 0,
                generation: 0,
            }),
            events,
            load_delay: Mutex::new(Duration::ZERO),
            pending_timers: AtomicUsize::new(0),
            query_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Delay every later load of this page by `delay`
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock() = delay;
    }

    /// Edits the live document, as a script on the page would
    pub fn mutate<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state.doc);
        self.settle(&mut state);
        result
    }

    /// Reads the live document
    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&self.state.lock().doc)
    }

    /// Number of snapshot queries served so far
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn publish(&self, event: PageEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn commit(&self, state: &mut PageState, doc: Document, how: HistoryMove) {
        let url = doc.url().to_string();
        state.doc = doc;
        state.generation += 1;
        match how {
            HistoryMove::Push => {
                state.history.truncate(state.index + 1);
                state.history.push(url.clone());
                state.index = state.history.len() - 1;
            }
            HistoryMove::Traverse(index) => state.index = index,
        }
        tracing::debug!("Page loaded {}", url);
        self.publish(PageEvent::Navigated { url });
        self.settle(state);
    }

    /// Applies queued effects and schedules queued timers
    fn settle(&self, state: &mut PageState) {
        loop {
            let effects = std::mem::take(&mut state.doc.effects);
            let timers = std::mem::take(&mut state.doc.timers);
            if effects.is_empty() && timers.is_empty() {
                return;
            }
            for (delay, timer) in timers {
                self.schedule(state.generation, delay, timer);
            }
            for effect in effects {
                match effect {
                    Effect::Navigate(url) => match self.site.load(&url) {
                        Some(doc) => self.commit(state, doc, HistoryMove::Push),
                        None => tracing::warn!("Link to unknown page {} ignored", url),
                    },
                    Effect::Download { url, filename } => {
                        tracing::debug!("Download started: {} ({})", filename, url);
                        self.publish(PageEvent::Download(Download::new(url, filename)));
                    }
                }
            }
        }
    }

    fn schedule(&self, generation: u64, delay: Duration, timer: Timer) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime; dropping page timer");
            return;
        };
        self.pending_timers.fetch_add(1, Ordering::SeqCst);
        let page = self.me.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(page) = page.upgrade() {
                page.fire_timer(generation, timer);
            }
        });
    }

    fn fire_timer(&self, generation: u64, timer: Timer) {
        {
            let mut state = self.state.lock();
            if state.generation == generation && !self.is_closed() {
                timer(&mut state.doc);
                self.settle(&mut state);
            }
        }
        self.pending_timers.fetch_sub(1, Ordering::SeqCst);
    }

    async fn load(&self, url: &str, how: HistoryMove, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let doc = self.site.load(url).ok_or_else(|| Error::NavigationError {
            url: url.to_string(),
            message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        })?;

        let delay = *self.load_delay.lock();
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(Error::NavigationError {
                url: url.to_string(),
                message: format!("Timeout {}ms exceeded", timeout.as_millis()),
            });
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;

        let mut state = self.state.lock();
        self.commit(&mut state, doc, how);
        Ok(())
    }

    async fn traverse(&self, step: isize, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        // The index only moves once the target has loaded
        let (index, target) = {
            let state = self.state.lock();
            let Some(index) = state.index.checked_add_signed(step) else {
                return Ok(());
            };
            let Some(url) = state.history.get(index).cloned() else {
                return Ok(());
            };
            (index, url)
        };
        self.load(&target, HistoryMove::Traverse(index), timeout).await
    }

    fn snapshot(doc: &Document, id: NodeId) -> ElementState {
        let control = doc.retarget(id);
        ElementState {
            tag: doc.tag(id).unwrap_or_default().to_string(),
            input_type: doc.input_type(control),
            attached: doc.is_attached(id),
            visible: doc.is_visible(id),
            enabled: !doc.is_disabled(control),
            editable: doc.is_editable(control),
            checked: doc.checked_state(control),
            multiple: doc.attr(control, "multiple").is_some(),
            value: doc.value(control),
            inner_text: doc.inner_text(id),
            text_content: doc.text_content(id),
            attributes: doc.attrs(id),
            bounding_box: doc.layout(id),
            obscured: doc.is_obscured(id),
            options: doc.options(control),
        }
    }

    fn perform(doc: &mut Document, selector: &Selector, target: NodeId, action: &Action) -> Result<()> {
        let control = doc.retarget(target);
        match action {
            Action::Click {
                button,
                click_count,
            } => {
                for detail in 1..=*click_count {
                    doc.click(target, *button, detail);
                }
            }
            Action::DoubleClick { button } => {
                doc.click(target, *button, 1);
                doc.click(target, *button, 2);
                doc.dispatch_event(target, "dblclick");
            }
            Action::Hover => doc.hover(target),
            Action::Fill(text) => doc.fill(control, text),
            Action::Press(key) => doc.press(target, key),
            Action::SetChecked(checked) => {
                if doc.checked_state(control) == Some(*checked) {
                    return Ok(());
                }
                doc.click(target, MouseButton::Left, 1);
                if doc.checked_state(control) != Some(*checked) {
                    return Err(Error::not_actionable(
                        selector.to_string(),
                        action.name(),
                        "clicking did not change the checked state",
                    ));
                }
            }
            Action::SelectOption(by) => {
                if doc.tag(control) != Some("select") {
                    return Err(Error::not_actionable(
                        selector.to_string(),
                        action.name(),
                        "element is not a <select>",
                    ));
                }
                if !doc.select_option(control, by) {
                    return Err(Error::InvalidInput(format!(
                        "no option matches {} in '{}'",
                        by, selector
                    )));
                }
            }
            Action::SetInputFiles(files) => {
                if doc.input_type(control).as_deref() != Some("file") {
                    return Err(Error::not_actionable(
                        selector.to_string(),
                        action.name(),
                        "element is not an <input type=file>",
                    ));
                }
                doc.set_files(control, files.iter().map(|f| f.name.clone()).collect());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageBackend for MemoryPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        self.load(url, HistoryMove::Push, timeout).await
    }

    async fn go_back(&self, timeout: Duration) -> Result<()> {
        self.traverse(-1, timeout).await
    }

    async fn go_forward(&self, timeout: Duration) -> Result<()> {
        self.traverse(1, timeout).await
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.state.lock().doc.url().to_string())
    }

    async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.state.lock().doc.title())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        if state != LoadState::NetworkIdle {
            return Ok(());
        }
        let idle = async {
            while self.pending_timers.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(IDLE_POLL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.map_err(|_| {
            Error::timeout(format!("waiting for load state {}", state.as_str()), timeout)
        })
    }

    async fn query(&self, selector: &Selector) -> Result<Vec<ElementState>> {
        self.ensure_open()?;
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let nodes = matcher::resolve(&state.doc, selector)?;
        Ok(nodes
            .into_iter()
            .map(|id| Self::snapshot(&state.doc, id))
            .collect())
    }

    async fn dispatch(
        &self,
        selector: &Selector,
        action: &Action,
        _timeout: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        let nodes = matcher::resolve(&state.doc, selector)?;
        let target = match nodes.as_slice() {
            [] => return Err(Error::not_found(selector.to_string(), action.name())),
            [one] => *one,
            many => {
                return Err(Error::StrictModeViolation {
                    selector: selector.to_string(),
                    count: many.len(),
                });
            }
        };
        tracing::trace!("Dispatching {} to {}", action.describe(), selector);
        let result = Self::perform(&mut state.doc, selector, target, action);
        self.settle(&mut state);
        result
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Closing in-memory page");
            self.publish(PageEvent::Closed);
        }
        Ok(())
    }
}
