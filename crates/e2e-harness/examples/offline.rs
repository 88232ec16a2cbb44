// Scenario against the in-memory backend
//
// Shows: building a scripted site, auto-waiting on late elements, a
// failing assertion reported with the last action

use e2e_harness::backend::memory::{Element, MemoryBrowser, Site};
use e2e_harness::{Harness, HarnessConfig, expect};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let site = Site::new().page("https://app.test/", |doc| {
        doc.set_title("App");
        let body = doc.body();
        let counter = doc.append(body, Element::new("span").id("count").text("0"));
        doc.after(Duration::from_millis(200), move |doc| {
            let body = doc.body();
            let button = doc.append(body, Element::new("button").id("inc").text("+1"));
            doc.on(button, "click", move |doc, _| {
                let next = doc
                    .text_content(counter)
                    .parse::<u32>()
                    .unwrap_or(0)
                    + 1;
                doc.set_text(counter, &next.to_string());
            });
        });
    });

    let harness = Harness::with_backend(MemoryBrowser::new(site), HarnessConfig::default());

    for expected in ["2", "3"] {
        let report = harness
            .run_scenario(&format!("count reaches {}", expected), |session| async move {
                session.goto("https://app.test/").await?;
                let button = session.locator("#inc")?;
                button.click(None).await?;
                button.click(None).await?;
                expect(&session.locator("#count")?)
                    .with_timeout(Duration::from_millis(300))
                    .to_have_text(expected)
                    .await
            })
            .await;
        println!("{}", report);
    }
    Ok(())
}
