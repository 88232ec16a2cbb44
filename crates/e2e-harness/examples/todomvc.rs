// TodoMVC scenario against a real browser
//
// Shows: Harness launch from E2E_* variables, run_scenario, test-id and
// role locators, hover-revealed controls, fluent assertions

use e2e_harness::{Harness, HarnessConfig, expect, expect_page};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let harness = Harness::launch(HarnessConfig::from_env()?).await?;

    let report = harness
        .run_scenario("add and delete a todo", |session| async move {
            session.goto("https://demo.playwright.dev/todomvc/#/").await?;
            expect_page(&session).to_have_title("React • TodoMVC").await?;

            let input = session.get_by_test_id("text-input");
            input.fill("Hello World!", None).await?;
            input.press("Enter", None).await?;

            let item = session.get_by_test_id("todo-item");
            expect(&item).to_have_count(1).await?;
            expect(&session.get_by_test_id("todo-title"))
                .to_have_text("Hello World!")
                .await?;

            // The delete button only shows on hover
            item.hover(None).await?;
            item.get_by_role("button", Some("Delete")).click(None).await?;
            expect(&item).to_have_count(0).await?;
            Ok(())
        })
        .await;

    println!("{}", report);
    harness.shutdown().await?;
    report.into_result()?;
    Ok(())
}
