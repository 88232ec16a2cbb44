//! e2e-harness: browser-driven end-to-end scenarios with auto-waiting
//!
//! A [`Harness`] launches a browser once and hands out isolated
//! [`Session`]s. Sessions build lazy [`Locator`]s; actions on a locator wait
//! for the element to be actionable, and assertions poll until they hold.
//!
//! # Examples
//!
//! ## A scenario against a real browser
//!
//! ```ignore
//! use e2e_harness::{expect, Harness, HarnessConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harness = Harness::launch(HarnessConfig::from_env()?).await?;
//!
//!     let report = harness
//!         .run_scenario("add todo", |session| async move {
//!             session.goto("https://demo.playwright.dev/todomvc").await?;
//!             let input = session.get_by_test_id("text-input");
//!             input.fill("Buy milk", None).await?;
//!             input.press("Enter", None).await?;
//!             expect(&session.get_by_test_id("todo-title"))
//!                 .to_have_text("Buy milk")
//!                 .await
//!         })
//!         .await;
//!
//!     println!("{}", report);
//!     harness.shutdown().await?;
//!     report.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Deterministic tests without a browser
//!
//! ```ignore
//! use e2e_harness::backend::memory::{Element, MemoryBrowser, Site};
//! use e2e_harness::{Harness, HarnessConfig};
//!
//! # async fn demo() -> e2e_harness::Result<()> {
//! let site = Site::new().page("https://app.test/", |doc| {
//!     doc.set_title("App");
//!     let body = doc.body();
//!     doc.append(body, Element::new("button").id("go").text("Go"));
//! });
//! let harness = Harness::with_backend(MemoryBrowser::new(site), HarnessConfig::default());
//! let session = harness.open().await?;
//! session.goto("https://app.test/").await?;
//! session.locator("#go")?.click(None).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Timeouts
//!
//! [`HarnessConfig`] carries every bound: actionability waits and reads use
//! `default_timeout`, navigation uses `navigation_timeout`, and `expect`
//! uses `assertion_timeout`. Options structs override the bound per call.

mod actionability;
mod actions;
mod assertions;
pub mod backend;
mod config;
mod error;
mod events;
mod executor;
mod locator;
mod selector;
mod session;

// Internal modules (exposed for integration tests)
#[doc(hidden)]
pub mod server;

pub use error::{Error, Result};

pub use config::{BrowserKind, HarnessConfig};

pub use session::{Harness, Outcome, ScenarioReport, Session, SessionState};

pub use locator::Locator;
pub use selector::{Selector, Step, Strategy};

pub use actions::{
    Action, ActionOptions, ClickOptions, ClickOptionsBuilder, FilePayload, InputFiles,
    MouseButton, SelectBy,
};

pub use events::{Download, EventKind, PageEvent, PendingWait};

pub use assertions::{
    Expectation, PageExpectation, PollState, assert_contains, assert_eventually, assert_value,
    expect, expect_page,
};

pub use backend::{BoundingBox, ElementState, LoadState, OptionState};
