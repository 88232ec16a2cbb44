// Integration tests for two-phase event waits
//
// Tests cover:
// - expect_download() around a click
// - begin_wait / resolve registered before the trigger
// - a failing trigger cancels the wait and surfaces its own error
// - no event within the timeout
// - navigation events

mod common;

use common::*;
use e2e_harness::{ClickOptions, Error, EventKind, PageEvent};

#[tokio::test]
async fn test_expect_download_from_link() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;
    let link = session.locator("#report").unwrap();

    let download = session
        .expect_download(|| link.click(None))
        .await
        .unwrap();
    assert_eq!(download.suggested_filename(), "report.csv");
    assert_eq!(download.url(), "https://qa.test/files/report.csv");
    // A download does not navigate
    assert_eq!(session.url().await.unwrap(), DOWNLOAD_URL);
}

#[tokio::test]
async fn test_two_phase_wait() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;

    let wait = session.begin_wait(EventKind::Download).unwrap();
    assert_eq!(wait.kind(), EventKind::Download);
    session
        .get_by_text("Download report", true)
        .click(None)
        .await
        .unwrap();

    match wait.resolve(ms(500)).await.unwrap() {
        PageEvent::Download(download) => assert_eq!(download.suggested_filename(), "report.csv"),
        other => panic!("expected a download, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_trigger_cancels_wait() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;
    let missing = session.locator("#no-such-link").unwrap();

    let err = session
        .expect_download(|| missing.click(Some(ClickOptions::builder().timeout(ms(50)).build())))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ElementNotFound { .. }));
}

#[tokio::test]
async fn test_no_download_times_out() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;

    let err = session.wait_for_download(ms(50)).await.unwrap_err();
    match err {
        Error::Timeout { operation, duration } => {
            assert!(operation.contains("download"));
            assert_eq!(duration, ms(50));
        }
        other => panic!("expected Timeout, got {:?}", other),
    }

    // A plain link navigates instead of downloading
    let wait = session.begin_wait(EventKind::Download).unwrap();
    session.locator("#home").unwrap().click(None).await.unwrap();
    assert!(matches!(
        wait.resolve(ms(50)).await,
        Err(Error::Timeout { .. })
    ));
}

#[tokio::test]
async fn test_navigation_event() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;

    let wait = session.begin_wait(EventKind::Navigation).unwrap();
    session.locator("#home").unwrap().click(None).await.unwrap();
    match wait.resolve(ms(500)).await.unwrap() {
        PageEvent::Navigated { url } => assert_eq!(url, "https://qa.test/"),
        other => panic!("expected navigation, got {:?}", other),
    }
    assert_eq!(session.title().await.unwrap(), "QA Home");
}

#[tokio::test]
async fn test_close_ends_pending_wait() {
    let (_browser, _harness, session) = open_at(DOWNLOAD_URL).await;
    let wait = session.begin_wait(EventKind::Download).unwrap();
    session.close().await.unwrap();
    assert!(matches!(
        wait.resolve(ms(500)).await,
        Err(Error::SessionClosed)
    ));
    assert!(matches!(
        session.begin_wait(EventKind::Download),
        Err(Error::SessionClosed)
    ));
}
