// Shared fixtures for integration tests
//
// In-memory pages modelled on the demo sites the browser tests visit, plus
// helpers to open a harness on them with short timeouts.

// Each test binary compiles this module separately and uses only part of it
#![allow(dead_code)]

use e2e_harness::backend::memory::{Element, MemoryBrowser, Site};
use e2e_harness::{Harness, HarnessConfig, Session};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const TODO_URL: &str = "https://demo.test/todomvc/#/";
pub const SEARCH_URL: &str = "https://search.test/";
pub const BUTTONS_URL: &str = "https://qa.test/button/";
pub const FORM_URL: &str = "https://qa.test/form/";
pub const TEXT_URL: &str = "https://qa.test/text/";
pub const UPLOAD_URL: &str = "https://qa.test/upload/";
pub const DOWNLOAD_URL: &str = "https://qa.test/download/";

/// Installs a test-friendly subscriber once; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Timeouts short enough that a failing wait ends quickly
pub fn fast_config() -> HarnessConfig {
    HarnessConfig::new()
        .default_timeout(ms(1000))
        .poll_interval(ms(10))
        .navigation_timeout(ms(1000))
        .assertion_timeout(ms(500))
}

pub fn harness() -> (Arc<MemoryBrowser>, Harness) {
    init_tracing();
    let browser = MemoryBrowser::new(site());
    let harness = Harness::with_backend(browser.clone(), fast_config());
    (browser, harness)
}

/// Opens a session and navigates it to `url`
pub async fn open_at(url: &str) -> (Arc<MemoryBrowser>, Harness, Session) {
    let (browser, harness) = harness();
    let session = harness.open().await.expect("Failed to open session");
    session.goto(url).await.expect("Failed to navigate");
    (browser, harness, session)
}

pub fn site() -> Site {
    Site::new()
        .page(TODO_URL, todo_page)
        .page(SEARCH_URL, search_page)
        .page(BUTTONS_URL, buttons_page)
        .page(FORM_URL, form_page)
        .page(TEXT_URL, text_page)
        .page(UPLOAD_URL, upload_page)
        .page(DOWNLOAD_URL, download_page)
        .page("https://qa.test/", |doc| doc.set_title("QA Home"))
}

fn todo_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("React • TodoMVC");
    let body = doc.body();
    let app = doc.append(body, Element::new("section").class("todoapp"));
    let header = doc.append(app, Element::new("header").class("header"));
    doc.append(header, Element::new("h1").text("todos"));
    let input = doc.append(
        header,
        Element::new("input")
            .class("new-todo")
            .test_id("text-input")
            .attr("placeholder", "What needs to be done?"),
    );
    let list = doc.append(app, Element::new("ul").class("todo-list"));

    doc.on(input, "keydown", move |doc, event| {
        if event.key.as_deref() != Some("Enter") {
            return;
        }
        let title = doc.value(input).unwrap_or_default().trim().to_string();
        if title.is_empty() {
            return;
        }
        let item = doc.append(list, Element::new("li").test_id("todo-item"));
        let view = doc.append(item, Element::new("div").class("view"));
        doc.append(
            view,
            Element::new("input")
                .class("toggle")
                .attr("type", "checkbox")
                .attr("aria-label", "Toggle Todo"),
        );
        doc.append(view, Element::new("label").test_id("todo-title").text(&title));
        let destroy = doc.append(
            view,
            Element::new("button")
                .class("destroy")
                .attr("aria-label", "Delete")
                .attr("style", "display: none"),
        );
        doc.on(item, "mouseover", move |doc, _| doc.remove_attr(destroy, "style"));
        doc.on(destroy, "click", move |doc, _| doc.remove(item));
        doc.set_value(input, "");
    });
}

fn search_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Search");
    let body = doc.body();
    let form = doc.append(body, Element::new("form").attr("role", "search"));
    doc.append(
        form,
        Element::new("textarea")
            .attr("aria-label", "ค้นหา")
            .attr("name", "q"),
    );
}

fn buttons_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Buttons");
    let body = doc.body();

    let example = doc.append(body, Element::new("div").test_id("single-click-example"));
    let single = doc.append(
        example,
        Element::new("button").test_id("single-click").text("Click me"),
    );
    let count = doc.append(example, Element::new("p").test_id("click-count").text("0"));
    doc.on(single, "click", move |doc, event| {
        doc.set_text(count, &event.detail.to_string());
    });

    let right = doc.append(
        body,
        Element::new("button").test_id("rightclick-count").text("0"),
    );
    doc.on(right, "contextmenu", move |doc, event| {
        doc.set_text(right, &event.detail.to_string());
    });

    let double = doc.append(
        body,
        Element::new("button").test_id("dbclick-count").text("0"),
    );
    doc.on(double, "dblclick", move |doc, _| {
        let n: u32 = doc.text_content(double).trim().parse().unwrap_or(0);
        doc.set_text(double, &(n + 1).to_string());
    });

    doc.append(
        body,
        Element::new("button")
            .id("disabled-button")
            .attr("disabled", "")
            .text("Disabled"),
    );

    let like = doc.append(
        body,
        Element::new("button")
            .test_id("like-button")
            .class("mx-1 px-2 rounded-md border-solid border border-amber-500")
            .text("Like"),
    );
    doc.on(like, "click", move |doc, _| {
        doc.set_attr(
            like,
            "class",
            "mx-1 px-2 bg-amber-500 rounded-md border-solid border border-amber-500",
        );
    });

    // Enabled shortly after load
    let later = doc.append(
        body,
        Element::new("button")
            .id("enabled-later")
            .attr("disabled", "")
            .text("Wait for me"),
    );
    doc.on(later, "click", move |doc, _| doc.set_text(later, "clicked"));
    doc.after(Duration::from_millis(150), move |doc| {
        doc.remove_attr(later, "disabled")
    });

    // Inserted shortly after load
    doc.after(Duration::from_millis(150), move |doc| {
        let body = doc.body();
        let late = doc.append(body, Element::new("button").id("late").text("Late"));
        doc.on(late, "click", move |doc, _| doc.set_text(late, "late clicked"));
    });

    // Covered by an overlay until it is dismissed
    let covered = doc.append(body, Element::new("button").id("covered").text("Covered"));
    let overlay = doc.append(
        body,
        Element::new("div").id("overlay").text("Loading..."),
    );
    let area = doc.layout(covered).unwrap_or_default();
    doc.set_layout(overlay, area);
    doc.set_overlay(overlay, true);
    doc.on(covered, "click", move |doc, _| doc.set_text(covered, "uncovered"));
    doc.after(Duration::from_millis(150), move |doc| doc.remove(overlay));
}

fn form_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Form");
    let body = doc.body();
    let form = doc.append(body, Element::new("form").id("profile"));

    doc.append(form, Element::new("label").attr("for", "name").text("Name"));
    doc.append(
        form,
        Element::new("input").id("name").attr("type", "text"),
    );
    doc.append(form, Element::new("textarea").id("bio"));
    doc.append(
        form,
        Element::new("input")
            .id("readonly")
            .attr("readonly", "")
            .attr("value", "fixed"),
    );

    doc.append(form, Element::new("label").attr("for", "pets").text("Pet"));
    doc.append(
        form,
        Element::new("select").id("pets").children(
            ["Bird", "Cat", "Dog"].map(|pet| {
                Element::new("option")
                    .attr("value", &format!("value-{}", pet))
                    .text(pet)
            }),
        ),
    );

    let group = doc.append(form, Element::new("fieldset").id("checkboxes"));
    for n in 1..=3 {
        let mut checkbox = Element::new("input")
            .id(&format!("cb{}", n))
            .attr("type", "checkbox")
            .attr("value", &n.to_string());
        if n == 3 {
            checkbox = checkbox.attr("disabled", "");
        }
        doc.append(
            group,
            Element::new("label")
                .child(checkbox)
                .text(&format!("Option {}", n)),
        );
    }

    let radios = doc.append(form, Element::new("fieldset").id("colors"));
    for (color, extra) in [("red", "checked"), ("blue", ""), ("green", "disabled")] {
        let mut radio = Element::new("input")
            .id(color)
            .attr("type", "radio")
            .attr("name", "color")
            .attr("value", color);
        if !extra.is_empty() {
            radio = radio.attr(extra, "");
        }
        doc.append(radios, radio);
        doc.append(radios, Element::new("label").attr("for", color).text(color));
    }

    doc.append(
        form,
        Element::new("div")
            .id("not-a-control")
            .text("Plain text"),
    );
}

fn text_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Text");
    let body = doc.body();
    doc.append(
        body,
        Element::new("p")
            .test_id("text-hidden")
            .text("This text is contains ")
            .child(Element::new("span").attr("style", "display:none").text("word "))
            .text("with display hidden."),
    );
    doc.append(
        body,
        Element::new("nav").child(Element::new("ul").children(
            ["ข่าว", "บันเทิง", "กีฬา"].map(|label| Element::new("li").text(label)),
        )),
    );
    let hidden = doc.append(
        body,
        Element::new("div")
            .id("hidden-element")
            .attr("style", "display:none")
            .child(Element::new("p").text("Hello World!")),
    );
    let reveal = doc.append(body, Element::new("button").id("reveal").text("Reveal"));
    doc.on(reveal, "click", move |doc, _| {
        doc.after(Duration::from_millis(100), move |doc| {
            doc.remove_attr(hidden, "style")
        });
    });
}

fn upload_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Upload");
    let body = doc.body();
    doc.append(
        body,
        Element::new("label").attr("for", "single").text("Choose file"),
    );
    let single = doc.append(
        body,
        Element::new("input").id("single").attr("type", "file"),
    );
    doc.append(
        body,
        Element::new("input")
            .id("multi")
            .attr("type", "file")
            .attr("multiple", ""),
    );
    doc.append(body, Element::new("input").id("text").attr("type", "text"));
    let status = doc.append(body, Element::new("p").id("file-name"));
    doc.on(single, "change", move |doc, _| {
        let names = doc.files(single).join(", ");
        doc.set_text(status, &names);
    });
}

fn download_page(doc: &mut e2e_harness::backend::memory::Document) {
    doc.set_title("Download");
    let body = doc.body();
    doc.append(
        body,
        Element::new("a")
            .id("report")
            .attr("href", "/files/report.csv")
            .attr("download", "report.csv")
            .text("Download report"),
    );
    doc.append(
        body,
        Element::new("a")
            .id("home")
            .attr("href", "/")
            .text("Home"),
    );
}
