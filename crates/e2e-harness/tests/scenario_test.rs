// Integration tests for scenario runs
//
// Tests cover:
// - passing scenario, session closed afterwards
// - failing scenario: diagnostic names the last action
// - panicking scenario is reported, not propagated
// - scenarios run concurrently on one browser without interference
// - shut-down browser fails scenarios at open
// - end-to-end flows (todo list, search box)

mod common;

use common::*;
use e2e_harness::{Error, Outcome, expect, expect_page};

#[tokio::test]
async fn test_passing_scenario_closes_session() {
    let (browser, harness) = harness();

    let report = harness
        .run_scenario("todo heading", |session| async move {
            session.goto(TODO_URL).await?;
            expect(&session.locator("h1")?).to_have_text("todos").await?;
            Ok(())
        })
        .await;

    assert!(report.passed(), "{}", report);
    assert_eq!(report.name, "todo heading");
    assert_eq!(report.last_action.as_deref(), Some(&*format!("goto {}", TODO_URL)));
    assert_eq!(browser.open_pages(), 0);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_failing_scenario_reports_last_action() {
    let (browser, harness) = harness();

    let report = harness
        .run_scenario("missing button", |session| async move {
            session.goto(BUTTONS_URL).await?;
            session
                .locator("#nope")?
                .click(Some(e2e_harness::ClickOptions::builder().timeout(ms(50)).build()))
                .await?;
            Ok(())
        })
        .await;

    assert!(!report.passed());
    match &report.outcome {
        Outcome::Failed { error, diagnostic } => {
            assert!(matches!(error, Error::ElementNotFound { .. }));
            assert!(diagnostic.contains("last action: click on '#nope'"), "{}", diagnostic);
        }
        Outcome::Passed => panic!("scenario should fail"),
    }
    assert!(report.to_string().contains("missing button"));
    assert_eq!(browser.open_pages(), 0);
}

#[tokio::test]
async fn test_panicking_scenario_is_contained() {
    let (browser, harness) = harness();

    let report = harness
        .run_scenario("panics", |session| async move {
            session.goto(FORM_URL).await?;
            let value = session.locator("#readonly")?.input_value().await?;
            assert_eq!(value, "something else");
            Ok(())
        })
        .await;

    match report.into_result() {
        Err(Error::Panicked(message)) => assert!(message.contains("something else"), "{}", message),
        other => panic!("expected Panicked, got {:?}", other),
    }
    assert_eq!(browser.open_pages(), 0);
}

#[tokio::test]
async fn test_concurrent_scenarios() {
    let (browser, harness) = harness();

    let fill = |url: &'static str, text: &'static str| {
        let harness = harness.clone();
        async move {
            harness
                .run_scenario(text, |session| async move {
                    session.goto(url).await?;
                    let name = session.locator("#name")?;
                    name.fill(text, None).await?;
                    session.wait_for_timeout(ms(20)).await?;
                    expect(&name).to_have_value(text).await?;
                    Ok(())
                })
                .await
        }
    };

    let reports = futures_util::future::join_all(vec![
        fill(FORM_URL, "first"),
        fill(FORM_URL, "second"),
        fill(FORM_URL, "third"),
    ])
    .await;

    for report in &reports {
        assert!(report.passed(), "{}", report);
    }
    assert_eq!(browser.open_pages(), 0);
}

#[tokio::test]
async fn test_shut_down_browser_fails_at_open() {
    let (_browser, harness) = harness();
    harness.shutdown().await.unwrap();

    let report = harness
        .run_scenario("after shutdown", |_session| async move { Ok(()) })
        .await;
    assert!(!report.passed());
    assert!(report.last_action.is_none());
}

#[tokio::test]
async fn test_todo_flow() {
    let (_browser, harness) = harness();

    let report = harness
        .run_scenario("todo flow", |session| async move {
            session.goto(TODO_URL).await?;
            expect_page(&session).to_have_title("React • TodoMVC").await?;

            let input = session.get_by_test_id("text-input");
            for todo in ["Buy milk", "Walk dog"] {
                input.fill(todo, None).await?;
                input.press("Enter", None).await?;
            }

            let items = session.get_by_test_id("todo-item");
            expect(&items).to_have_count(2).await?;
            assert_eq!(
                session.get_by_test_id("todo-title").all_inner_texts().await?,
                vec!["Buy milk".to_string(), "Walk dog".to_string()]
            );

            let first = items.first();
            first.get_by_role("checkbox", None).check(None).await?;
            expect(&first.get_by_role("checkbox", None)).to_be_checked().await?;

            first.hover(None).await?;
            first.get_by_role("button", Some("Delete")).click(None).await?;
            expect(&items).to_have_count(1).await?;
            expect(&session.get_by_test_id("todo-title"))
                .to_have_text("Walk dog")
                .await?;
            Ok(())
        })
        .await;

    assert!(report.passed(), "{}", report);
}

#[tokio::test]
async fn test_search_box_flow() {
    let (_browser, harness) = harness();

    let report = harness
        .run_scenario("search", |session| async move {
            session.goto(SEARCH_URL).await?;
            let search = session
                .get_by_role("combobox", Some("ค้นหา"))
                .or(&session.get_by_role("textbox", Some("ค้นหา")));
            search.fill("playwright", None).await?;
            expect(&search).to_have_value("playwright").await?;
            Ok(())
        })
        .await;

    assert!(report.passed(), "{}", report);
}
