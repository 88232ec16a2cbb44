// Assertions - polling checks over page state
//
// `assert_eventually` re-evaluates a probe until it yields the expected value
// or the timeout passes. Probe failures that polling can fix (no match yet,
// several matches mid-render) count as observations; anything else aborts.
// `expect()` and `expect_page()` build the fluent Playwright-style layer on
// top of the same poller.
//
// See: https://playwright.dev/docs/test-assertions

use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::session::Session;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Where a polling assertion is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Pending,
    Polling,
    Satisfied,
    TimedOut,
}

/// One polling assertion
pub(crate) struct Poll<'a> {
    what: &'a str,
    expected: String,
    timeout: Duration,
    poll_interval: Duration,
    state: PollState,
    last_observed: Option<String>,
}

impl<'a> Poll<'a> {
    pub(crate) fn new(
        what: &'a str,
        expected: String,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            what,
            expected,
            timeout,
            poll_interval,
            state: PollState::Pending,
            last_observed: None,
        }
    }

    fn transition(&mut self, state: PollState) {
        tracing::trace!("Assertion on {}: {:?} -> {:?}", self.what, self.state, state);
        self.state = state;
    }

    /// Probes until `accept` holds, returning the accepted observation
    pub(crate) async fn run<T, P, Fut, F>(&mut self, mut probe: P, accept: F) -> Result<T>
    where
        T: Debug,
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        F: Fn(&T) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        self.transition(PollState::Polling);

        loop {
            match probe().await {
                Ok(observed) if accept(&observed) => {
                    self.transition(PollState::Satisfied);
                    return Ok(observed);
                }
                Ok(observed) => self.last_observed = Some(format!("{:?}", observed)),
                Err(e) if e.is_transient() => self.last_observed = Some(e.to_string()),
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                self.transition(PollState::TimedOut);
                return Err(Error::AssertionFailed {
                    what: self.what.to_string(),
                    expected: self.expected.clone(),
                    actual: self
                        .last_observed
                        .clone()
                        .unwrap_or_else(|| "nothing observed".to_string()),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// Polls `probe` until it returns `expected`.
///
/// # Errors
///
/// - `Error::AssertionFailed` with the last observation once `timeout` passes
/// - any non-transient error the probe returns, immediately
///
/// # Example
///
/// ```ignore
/// use e2e_harness::assert_eventually;
/// use std::time::Duration;
///
/// let items = session.get_by_test_id("todo-item");
/// assert_eventually(
///     "todo count",
///     || items.count(),
///     3,
///     Duration::from_secs(5),
///     Duration::from_millis(100),
/// )
/// .await?;
/// ```
pub async fn assert_eventually<T, P, Fut>(
    what: &str,
    probe: P,
    expected: T,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()>
where
    T: PartialEq + Debug,
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Poll::new(what, format!("{:?}", expected), timeout, poll_interval)
        .run(probe, |observed| *observed == expected)
        .await
        .map(|_| ())
}

/// Compares once, without retrying
pub fn assert_value<T: PartialEq + Debug>(what: &str, observed: T, expected: T) -> Result<()> {
    if observed == expected {
        Ok(())
    } else {
        Err(Error::AssertionFailed {
            what: what.to_string(),
            expected: format!("{:?}", expected),
            actual: format!("{:?}", observed),
        })
    }
}

pub fn assert_contains(what: &str, observed: &str, needle: &str) -> Result<()> {
    if observed.contains(needle) {
        Ok(())
    } else {
        Err(Error::AssertionFailed {
            what: what.to_string(),
            expected: format!("to contain {:?}", needle),
            actual: format!("{:?}", observed),
        })
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Creates an expectation for a locator with auto-retry behavior.
///
/// Assertions retry until they pass or the configured assertion timeout
/// (default: 5 seconds) runs out.
///
/// # Example
///
/// ```ignore
/// use e2e_harness::expect;
///
/// session.goto("https://the-internet.herokuapp.com/checkboxes").await?;
/// let boxes = session.locator("#checkboxes input")?;
/// expect(&boxes).to_have_count(2).await?;
/// expect(&boxes.first()).not().to_be_checked().await?;
/// expect(&boxes.last()).to_be_checked().await?;
/// ```
pub fn expect(locator: &Locator) -> Expectation {
    Expectation::new(locator.clone())
}

/// Expectation wraps a locator and provides assertion methods with auto-retry.
pub struct Expectation {
    locator: Locator,
    timeout: Duration,
    poll_interval: Duration,
    negate: bool,
}

// to_* methods consume self, matching Playwright's chained expect API
#[allow(clippy::wrong_self_convention)]
impl Expectation {
    pub(crate) fn new(locator: Locator) -> Self {
        let config = locator.config();
        Self {
            timeout: config.assertion_timeout,
            poll_interval: config.poll_interval,
            locator,
            negate: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Negates the assertion.
    ///
    /// `.not()` rather than `std::ops::Not`, to read like Playwright's API.
    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    fn what(&self, property: &str) -> String {
        format!("{} of '{}'", property, self.locator)
    }

    fn expected(&self, expected: String) -> String {
        if self.negate {
            format!("not {}", expected)
        } else {
            expected
        }
    }

    async fn check<T, P, Fut, F>(&self, property: &str, expected: String, probe: P, accept: F) -> Result<()>
    where
        T: Debug,
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        F: Fn(&T) -> bool,
    {
        let what = self.what(property);
        let negate = self.negate;
        Poll::new(&what, self.expected(expected), self.timeout, self.poll_interval)
            .run(probe, |observed| accept(observed) != negate)
            .await
            .map(|_| ())
    }

    async fn check_text<F>(&self, property: &str, expected: String, accept: F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        let locator = &self.locator;
        self.check(
            property,
            expected,
            || async move {
                let state = locator.single_now(property).await?;
                Ok(normalize_whitespace(&state.inner_text))
            },
            |text: &String| accept(text.as_str()),
        )
        .await
    }

    /// Inner text equals `expected` after whitespace normalization
    ///
    /// See: <https://playwright.dev/docs/test-assertions#locator-assertions-to-have-text>
    pub async fn to_have_text(self, expected: &str) -> Result<()> {
        let expected = normalize_whitespace(expected);
        self.check_text("text", format!("{:?}", expected), |text| text == expected)
            .await
    }

    pub async fn to_contain_text(self, expected: &str) -> Result<()> {
        let needle = normalize_whitespace(expected);
        self.check_text(
            "text",
            format!("to contain {:?}", needle),
            |text| text.contains(&needle),
        )
        .await
    }

    /// Inner text matches a regular expression
    ///
    /// # Errors
    ///
    /// `Error::InvalidInput` if `pattern` is not a valid regex.
    pub async fn to_have_text_regex(self, pattern: &str) -> Result<()> {
        let re = regex::Regex::new(pattern)
            .map_err(|e| Error::InvalidInput(format!("Invalid regex: {}", e)))?;
        self.check_text("text", format!("to match /{}/", pattern), |text| {
            re.is_match(text)
        })
        .await
    }

    pub async fn to_have_value(self, expected: &str) -> Result<()> {
        let locator = &self.locator;
        self.check(
            "value",
            format!("{:?}", expected),
            || async move { Ok(locator.single_now("to_have_value").await?.value) },
            |value: &Option<String>| value.as_deref() == Some(expected),
        )
        .await
    }

    /// The `class` attribute equals `expected`, ignoring extra whitespace
    pub async fn to_have_class(self, expected: &str) -> Result<()> {
        let expected = normalize_whitespace(expected);
        let locator = &self.locator;
        self.check(
            "class",
            format!("{:?}", expected),
            || async move {
                let state = locator.single_now("to_have_class").await?;
                Ok(state.attribute("class").map(normalize_whitespace))
            },
            |class: &Option<String>| class.as_deref() == Some(expected.as_str()),
        )
        .await
    }

    pub async fn to_have_attribute(self, name: &str, expected: &str) -> Result<()> {
        let locator = &self.locator;
        self.check(
            &format!("attribute '{}'", name),
            format!("{:?}", expected),
            || async move {
                let state = locator.single_now("to_have_attribute").await?;
                Ok(state.attribute(name).map(str::to_string))
            },
            |value: &Option<String>| value.as_deref() == Some(expected),
        )
        .await
    }

    pub async fn to_have_count(self, expected: usize) -> Result<()> {
        let locator = &self.locator;
        self.check(
            "count",
            expected.to_string(),
            || locator.count(),
            |count: &usize| *count == expected,
        )
        .await
    }

    /// See: <https://playwright.dev/docs/test-assertions#locator-assertions-to-be-visible>
    pub async fn to_be_visible(self) -> Result<()> {
        let locator = &self.locator;
        self.check(
            "visibility",
            "visible".to_string(),
            || locator.is_visible(),
            |visible: &bool| *visible,
        )
        .await
    }

    /// Hidden or not present at all
    pub async fn to_be_hidden(self) -> Result<()> {
        self.not().to_be_visible().await
    }

    pub async fn to_be_enabled(self) -> Result<()> {
        let locator = &self.locator;
        self.check(
            "enabled state",
            "enabled".to_string(),
            || async move { Ok(locator.single_now("to_be_enabled").await?.enabled) },
            |enabled: &bool| *enabled,
        )
        .await
    }

    pub async fn to_be_disabled(self) -> Result<()> {
        self.not().to_be_enabled().await
    }

    pub async fn to_be_checked(self) -> Result<()> {
        let locator = &self.locator;
        self.check(
            "checked state",
            "checked".to_string(),
            || async move { Ok(locator.single_now("to_be_checked").await?.checked) },
            |checked: &Option<bool>| *checked == Some(true),
        )
        .await
    }

    pub async fn to_be_unchecked(self) -> Result<()> {
        self.not().to_be_checked().await
    }
}

/// Creates an expectation on the page of a session
pub fn expect_page(session: &Session) -> PageExpectation {
    let config = session.config();
    PageExpectation {
        timeout: config.assertion_timeout,
        poll_interval: config.poll_interval,
        session: session.clone(),
        negate: false,
    }
}

/// Page-level assertions with auto-retry
pub struct PageExpectation {
    session: Session,
    timeout: Duration,
    poll_interval: Duration,
    negate: bool,
}

#[allow(clippy::wrong_self_convention)]
impl PageExpectation {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    async fn check<P, Fut, F>(&self, what: &str, expected: String, probe: P, accept: F) -> Result<()>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
        F: Fn(&str) -> bool,
    {
        let expected = if self.negate {
            format!("not {}", expected)
        } else {
            expected
        };
        let negate = self.negate;
        Poll::new(what, expected, self.timeout, self.poll_interval)
            .run(probe, |observed: &String| accept(observed.as_str()) != negate)
            .await
            .map(|_| ())
    }

    pub async fn to_have_url(self, expected: &str) -> Result<()> {
        let session = &self.session;
        self.check("page url", format!("{:?}", expected), || session.url(), |url| {
            url == expected
        })
        .await
    }

    pub async fn to_have_url_containing(self, fragment: &str) -> Result<()> {
        let session = &self.session;
        self.check(
            "page url",
            format!("to contain {:?}", fragment),
            || session.url(),
            |url| url.contains(fragment),
        )
        .await
    }

    pub async fn to_have_title(self, expected: &str) -> Result<()> {
        let session = &self.session;
        self.check(
            "page title",
            format!("{:?}", expected),
            || session.title(),
            |title| title == expected,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_satisfied_after_retries() {
        let calls = &AtomicUsize::new(0);
        let mut poll = Poll::new(
            "counter",
            "3".into(),
            Duration::from_secs(1),
            Duration::from_millis(10),
        );
        let value = poll
            .run(
                || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) + 1) },
                |n| *n == 3,
            )
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(poll.state, PollState::Satisfied);
    }

    #[tokio::test]
    async fn test_poll_times_out_with_last_observation() {
        let mut poll = Poll::new(
            "label",
            "\"b\"".into(),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        let err = poll
            .run(|| async { Ok("a".to_string()) }, |s| s == "b")
            .await
            .unwrap_err();
        assert_eq!(poll.state, PollState::TimedOut);
        match err {
            Error::AssertionFailed { what, expected, actual } => {
                assert_eq!(what, "label");
                assert_eq!(expected, "\"b\"");
                assert_eq!(actual, "\"a\"");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_observations() {
        let calls = &AtomicUsize::new(0);
        let result = assert_eventually(
            "item",
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::not_found("#late", "probe"))
                } else {
                    Ok("ready")
                }
            },
            "ready",
            Duration::from_secs(1),
            Duration::from_millis(10),
        )
        .await;
        assert!(result.is_ok());

        let err = assert_eventually(
            "missing",
            || async { Err::<u32, _>(Error::not_found("#never", "probe")) },
            1,
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        match err {
            Error::AssertionFailed { actual, .. } => assert!(actual.contains("#never")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_probe_error_aborts() {
        let calls = &AtomicUsize::new(0);
        let err = assert_eventually(
            "closed",
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(Error::SessionClosed)
            },
            1,
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_immediate_checks() {
        assert!(assert_value("count", 2, 2).is_ok());
        let err = assert_value("count", 1, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Assertion failed for count: expected 2, actual 1"
        );
        assert!(assert_contains("title", "Hello World!", "World").is_ok());
        assert!(assert_contains("title", "Hello", "World").is_err());
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n b\tc "), "a b c");
    }
}
