// Locator - lazy element queries and the actions performed through them
//
// A Locator holds a selector and a handle to its session. Building one never
// touches the page; every action and read resolves the selector afresh, so a
// locator created before a re-render still finds the new element.

use crate::actions::{Action, ActionOptions, ClickOptions, InputFiles, SelectBy};
use crate::backend::{ElementState, PageBackend};
use crate::config::HarnessConfig;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::selector::{Selector, Step, Strategy};
use crate::session::SessionInner;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Locator represents a way to find element(s) on the page at any given moment.
///
/// Locators are lazy: they don't query the page until an action or read is
/// performed. Actions wait for the element to become actionable; reads wait
/// for the element to appear.
///
/// # Examples
///
/// ```ignore
/// use e2e_harness::{Harness, HarnessConfig, SelectBy};
///
/// # async fn demo(harness: Harness) -> e2e_harness::Result<()> {
/// let session = harness.open().await?;
/// session.goto("https://demo.playwright.dev/todomvc").await?;
///
/// let input = session.get_by_test_id("text-input");
/// input.fill("Buy milk", None).await?;
/// input.press("Enter", None).await?;
///
/// let items = session.get_by_test_id("todo-item");
/// assert_eq!(items.count().await?, 1);
/// items.first().get_by_role("checkbox", None).check(None).await?;
///
/// session
///     .locator("#pets")?
///     .select_option(SelectBy::Label("Cat".into()), None)
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Locator {
    session: Arc<SessionInner>,
    selector: Selector,
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locator")
            .field("selector", &self.selector.to_string())
            .finish()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.selector.fmt(f)
    }
}

impl Locator {
    pub(crate) fn new(session: Arc<SessionInner>, selector: Selector) -> Self {
        Self { session, selector }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub(crate) fn config(&self) -> &HarnessConfig {
        self.session.config()
    }

    fn derive(&self, selector: Selector) -> Self {
        Self::new(Arc::clone(&self.session), selector)
    }

    fn child(&self, strategy: Strategy) -> Self {
        self.derive(self.selector.then(Step::Find(strategy)))
    }

    // Scoped builders

    /// Descendants matching a selector string
    pub fn locator(&self, selector: &str) -> Result<Locator> {
        Ok(self.derive(self.selector.scoped(&Selector::parse(selector)?)))
    }

    pub fn get_by_test_id(&self, id: &str) -> Locator {
        self.child(Strategy::test_id(id))
    }

    pub fn get_by_text(&self, text: &str, exact: bool) -> Locator {
        self.child(Strategy::text(text, exact))
    }

    pub fn get_by_role(&self, role: &str, name: Option<&str>) -> Locator {
        self.child(Strategy::role(role, name))
    }

    pub fn get_by_role_exact(&self, role: &str, name: &str) -> Locator {
        self.child(Strategy::role_exact(role, name))
    }

    pub fn xpath(&self, expression: &str) -> Locator {
        self.child(Strategy::xpath(expression))
    }

    /// This locator evaluated inside `parent`
    pub fn within(&self, parent: &Locator) -> Locator {
        self.derive(parent.selector.scoped(&self.selector))
    }

    /// The element at zero-based `index`; negative values count from the end
    pub fn nth(&self, index: i32) -> Locator {
        self.derive(self.selector.then(Step::Nth(index)))
    }

    pub fn first(&self) -> Locator {
        self.nth(0)
    }

    pub fn last(&self) -> Locator {
        self.nth(-1)
    }

    /// Elements matched by both locators
    pub fn and(&self, other: &Locator) -> Locator {
        self.derive(self.selector.then(Step::And(other.selector.clone())))
    }

    /// Elements matched by either locator, in document order
    pub fn or(&self, other: &Locator) -> Locator {
        self.derive(self.selector.then(Step::Or(other.selector.clone())))
    }

    // Actions

    /// Takes the session's operation lock and records the action
    async fn begin(
        &self,
        description: String,
    ) -> Result<(tokio::sync::MutexGuard<'_, ()>, &dyn PageBackend)> {
        let acquired = self.session.acquire().await?;
        self.session
            .record(format!("{} on '{}'", description, self.selector));
        Ok(acquired)
    }

    fn executor<'a>(&'a self, page: &'a dyn PageBackend, timeout: Option<Duration>) -> Executor<'a> {
        let config = self.session.config();
        Executor {
            page,
            selector: &self.selector,
            timeout: timeout.unwrap_or(config.default_timeout),
            poll_interval: config.poll_interval,
        }
    }

    async fn run(&self, action: Action, timeout: Option<Duration>) -> Result<()> {
        let (_guard, page) = self.begin(action.describe()).await?;
        self.executor(page, timeout).run(action).await
    }

    /// Clicks the element. `button` and `click_count` are forwarded as given.
    ///
    /// # Errors
    ///
    /// - `Error::ElementNotFound` if nothing matches when the wait ends
    /// - `Error::Timeout` naming the unmet condition, e.g. `click: not enabled`
    /// - `Error::StrictModeViolation` if several elements match
    /// - `Error::InvalidInput` for a `click_count` of zero
    pub async fn click(&self, options: Option<ClickOptions>) -> Result<()> {
        let options = options.unwrap_or_default();
        let click_count = options.click_count.unwrap_or(1);
        if click_count == 0 {
            return Err(Error::InvalidInput(format!(
                "click_count must be at least 1 (selector '{}')",
                self.selector
            )));
        }
        let action = Action::Click {
            button: options.button.unwrap_or_default(),
            click_count,
        };
        self.run(action, options.timeout).await
    }

    pub async fn dblclick(&self, options: Option<ClickOptions>) -> Result<()> {
        let options = options.unwrap_or_default();
        let action = Action::DoubleClick {
            button: options.button.unwrap_or_default(),
        };
        self.run(action, options.timeout).await
    }

    pub async fn right_click(&self, options: Option<ActionOptions>) -> Result<()> {
        let action = Action::Click {
            button: crate::actions::MouseButton::Right,
            click_count: 1,
        };
        self.run(action, options.unwrap_or_default().timeout).await
    }

    pub async fn hover(&self, options: Option<ActionOptions>) -> Result<()> {
        self.run(Action::Hover, options.unwrap_or_default().timeout)
            .await
    }

    /// Replaces the value of an input, textarea or contenteditable element
    pub async fn fill(&self, text: &str, options: Option<ActionOptions>) -> Result<()> {
        self.run(
            Action::Fill(text.to_string()),
            options.unwrap_or_default().timeout,
        )
        .await
    }

    /// Empties the field; clearing an empty field is a no-op
    pub async fn clear(&self, options: Option<ActionOptions>) -> Result<()> {
        self.run(Action::Fill(String::new()), options.unwrap_or_default().timeout)
            .await
    }

    /// Presses a key such as `Enter` or `Control+A` on the focused element
    pub async fn press(&self, key: &str, options: Option<ActionOptions>) -> Result<()> {
        self.run(
            Action::Press(key.to_string()),
            options.unwrap_or_default().timeout,
        )
        .await
    }

    /// Checks a checkbox or radio button. Already checked is a no-op.
    ///
    /// # Errors
    ///
    /// `Error::ElementNotActionable`, without waiting, when the control is
    /// disabled or is not a checkbox or radio button.
    pub async fn check(&self, options: Option<ActionOptions>) -> Result<()> {
        self.set_checked(true, options).await
    }

    /// Unchecks a checkbox. Radio buttons cannot be unchecked.
    pub async fn uncheck(&self, options: Option<ActionOptions>) -> Result<()> {
        self.set_checked(false, options).await
    }

    pub async fn set_checked(&self, checked: bool, options: Option<ActionOptions>) -> Result<()> {
        let (_guard, page) = self.begin(Action::SetChecked(checked).describe()).await?;
        self.executor(page, options.unwrap_or_default().timeout)
            .set_checked(checked)
            .await
    }

    /// Selects one option of a `<select>`.
    ///
    /// Strings select by value; use [`SelectBy::Label`] or
    /// [`SelectBy::Index`] for the other modes.
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if no option matches once the element is
    /// actionable.
    pub async fn select_option(
        &self,
        option: impl Into<SelectBy>,
        options: Option<ActionOptions>,
    ) -> Result<()> {
        let by = option.into();
        let (_guard, page) = self
            .begin(Action::SelectOption(by.clone()).describe())
            .await?;
        self.executor(page, options.unwrap_or_default().timeout)
            .select_option(by)
            .await
    }

    /// Sets the files of an `<input type=file>`, or of the input a label
    /// points at.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for several files on a single-file input,
    ///   before any file is read
    /// - `Error::FileAccessError` if a file cannot be read
    pub async fn set_input_files(
        &self,
        files: impl Into<InputFiles>,
        options: Option<ActionOptions>,
    ) -> Result<()> {
        let files = files.into();
        let description = format!(
            "set_input_files({})",
            files
                .paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let (_guard, page) = self.begin(description).await?;
        self.executor(page, options.unwrap_or_default().timeout)
            .set_input_files(files)
            .await
    }

    // Reads

    /// Snapshots every current match without waiting
    pub(crate) async fn query_now(&self) -> Result<Vec<ElementState>> {
        let (_guard, page) = self.session.acquire().await?;
        page.query(&self.selector).await
    }

    /// The single current match, without waiting
    pub(crate) async fn single_now(&self, operation: &str) -> Result<ElementState> {
        let mut states = self.query_now().await?;
        match states.len() {
            0 => Err(Error::not_found(self.selector.to_string(), operation)),
            1 => Ok(states.remove(0)),
            count => Err(Error::StrictModeViolation {
                selector: self.selector.to_string(),
                count,
            }),
        }
    }

    /// Waits up to the default timeout for the locator to match
    async fn single(&self, operation: &str) -> Result<ElementState> {
        let config = self.config();
        let deadline = Instant::now() + config.default_timeout;
        let poll = config.poll_interval;
        loop {
            match self.single_now(operation).await {
                Err(Error::ElementNotFound { .. }) if Instant::now() < deadline => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(poll.min(remaining)).await;
                }
                result => return result,
            }
        }
    }

    pub async fn inner_text(&self) -> Result<String> {
        Ok(self.single("inner_text").await?.inner_text)
    }

    pub async fn text_content(&self) -> Result<String> {
        Ok(self.single("text_content").await?.text_content)
    }

    /// Current value of an input, textarea or select
    ///
    /// # Errors
    ///
    /// `Error::ElementNotActionable` if the element has no value.
    #[doc(alias = "read_value")]
    pub async fn input_value(&self) -> Result<String> {
        let state = self.single("input_value").await?;
        state.value.ok_or_else(|| {
            Error::not_actionable(
                self.selector.to_string(),
                "input_value",
                format!("<{}> is not an input, textarea or select", state.tag),
            )
        })
    }

    pub async fn read_value(&self) -> Result<String> {
        self.input_value().await
    }

    pub async fn get_attribute(&self, name: &str) -> Result<Option<String>> {
        let state = self.single("get_attribute").await?;
        Ok(state.attribute(name).map(str::to_string))
    }

    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.single("is_enabled").await?.enabled)
    }

    pub async fn is_disabled(&self) -> Result<bool> {
        Ok(!self.is_enabled().await?)
    }

    /// # Errors
    ///
    /// `Error::ElementNotActionable` if the element is not a checkbox or radio.
    pub async fn is_checked(&self) -> Result<bool> {
        let state = self.single("is_checked").await?;
        state.checked.ok_or_else(|| {
            Error::not_actionable(
                self.selector.to_string(),
                "is_checked",
                "not a checkbox or radio button",
            )
        })
    }

    pub async fn is_editable(&self) -> Result<bool> {
        Ok(self.single("is_editable").await?.editable)
    }

    /// Whether the element is visible right now. No match counts as hidden.
    pub async fn is_visible(&self) -> Result<bool> {
        match self.single_now("is_visible").await {
            Ok(state) => Ok(state.visible),
            Err(Error::ElementNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn is_hidden(&self) -> Result<bool> {
        Ok(!self.is_visible().await?)
    }

    /// Number of elements matching right now
    pub async fn count(&self) -> Result<usize> {
        Ok(self.query_now().await?.len())
    }

    pub async fn all_inner_texts(&self) -> Result<Vec<String>> {
        Ok(self
            .query_now()
            .await?
            .into_iter()
            .map(|s| s.inner_text)
            .collect())
    }

    pub async fn all_text_contents(&self) -> Result<Vec<String>> {
        Ok(self
            .query_now()
            .await?
            .into_iter()
            .map(|s| s.text_content)
            .collect())
    }
}
