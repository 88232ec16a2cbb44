// Integration tests for session navigation and lifecycle
//
// Tests cover:
// - goto / url / title
// - go_back and go_forward
// - unreachable targets and slow loads
// - wait_for_load_state(NetworkIdle)
// - close() is idempotent and later operations fail
// - sessions are isolated from each other

mod common;

use common::*;
use e2e_harness::{Error, LoadState, SessionState, expect_page};

#[tokio::test]
async fn test_goto_reports_url_and_title() {
    let (_browser, _harness, session) = open_at(TODO_URL).await;

    assert_eq!(session.url().await.unwrap(), TODO_URL);
    assert_eq!(session.title().await.unwrap(), "React • TodoMVC");
    assert_eq!(session.last_action().as_deref(), Some("goto https://demo.test/todomvc/#/"));

    let heading = session.locator("h1").unwrap().inner_text().await.unwrap();
    assert_eq!(heading, "todos");

    expect_page(&session).to_have_url(TODO_URL).await.unwrap();
    expect_page(&session)
        .to_have_title("React • TodoMVC")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_back_and_forward() {
    let (_browser, _harness, session) = open_at(TODO_URL).await;
    session.goto(SEARCH_URL).await.unwrap();

    session.go_back().await.unwrap();
    expect_page(&session).to_have_url(TODO_URL).await.unwrap();

    session.go_forward().await.unwrap();
    expect_page(&session).to_have_url(SEARCH_URL).await.unwrap();

    // Nothing further ahead: stays put
    session.go_forward().await.unwrap();
    assert_eq!(session.url().await.unwrap(), SEARCH_URL);
}

#[tokio::test]
async fn test_unreachable_target_is_navigation_error() {
    let (_browser, harness) = harness();
    let session = harness.open().await.unwrap();

    let err = session.goto("https://unreachable.test/").await.unwrap_err();
    match err {
        Error::NavigationError { url, .. } => assert_eq!(url, "https://unreachable.test/"),
        other => panic!("expected NavigationError, got {:?}", other),
    }
    // The session is still usable
    session.goto(SEARCH_URL).await.unwrap();
}

#[tokio::test]
async fn test_slow_load_exceeds_navigation_timeout() {
    let (browser, harness) = harness();
    let session = harness.open().await.unwrap();
    browser
        .last_page()
        .expect("page")
        .set_load_delay(ms(5_000));

    let started = std::time::Instant::now();
    let err = session.goto(TODO_URL).await.unwrap_err();
    assert!(matches!(err, Error::NavigationError { .. }));
    assert!(started.elapsed() < ms(3_000));
}

#[tokio::test]
async fn test_failed_back_keeps_history_position() {
    let (browser, _harness, session) = open_at(FORM_URL).await;
    session.goto(BUTTONS_URL).await.unwrap();
    let page = browser.last_page().expect("page");

    page.set_load_delay(ms(5_000));
    let err = session.go_back().await.unwrap_err();
    assert!(matches!(err, Error::NavigationError { .. }), "{:?}", err);
    assert_eq!(session.url().await.unwrap(), BUTTONS_URL);

    page.set_load_delay(ms(0));
    session.go_back().await.unwrap();
    assert_eq!(session.url().await.unwrap(), FORM_URL);
    session.go_forward().await.unwrap();
    assert_eq!(session.url().await.unwrap(), BUTTONS_URL);
}

#[tokio::test]
async fn test_wait_for_network_idle_lets_timers_finish() {
    let (_browser, _harness, session) = open_at(BUTTONS_URL).await;

    session
        .wait_for_load_state(LoadState::NetworkIdle)
        .await
        .unwrap();

    // Timers have run: the late button exists and the overlay is gone
    assert_eq!(session.locator("#late").unwrap().count().await.unwrap(), 1);
    assert_eq!(session.locator("#overlay").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (browser, _harness, session) = open_at(TODO_URL).await;
    assert_eq!(session.state(), SessionState::Open);

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(browser.open_pages(), 0);

    assert!(matches!(session.url().await, Err(Error::SessionClosed)));
    assert!(matches!(session.goto(TODO_URL).await, Err(Error::SessionClosed)));
    let click = session.locator("h1").unwrap().click(None).await;
    assert!(matches!(click, Err(Error::SessionClosed)));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (browser, harness) = harness();
    let first = harness.open().await.unwrap();
    let second = harness.open().await.unwrap();

    first.goto(TODO_URL).await.unwrap();
    let input = first.get_by_test_id("text-input");
    input.fill("only in first", None).await.unwrap();
    input.press("Enter", None).await.unwrap();

    second.goto(TODO_URL).await.unwrap();
    assert_eq!(first.get_by_test_id("todo-item").count().await.unwrap(), 1);
    assert_eq!(second.get_by_test_id("todo-item").count().await.unwrap(), 0);

    first.close().await.unwrap();
    assert_eq!(browser.open_pages(), 1);
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_open_session_is_closed_in_background() {
    let (browser, harness) = harness();
    {
        let session = harness.open().await.unwrap();
        session.goto(TODO_URL).await.unwrap();
    }
    // The close runs on a spawned task
    for _ in 0..50 {
        if browser.open_pages() == 0 {
            break;
        }
        tokio::time::sleep(ms(10)).await;
    }
    assert_eq!(browser.open_pages(), 0);
}

#[tokio::test]
async fn test_wait_for_timeout_sleeps() {
    let (_browser, _harness, session) = open_at(TODO_URL).await;
    let started = std::time::Instant::now();
    session.wait_for_timeout(ms(50)).await.unwrap();
    assert!(started.elapsed() >= ms(50));
}
