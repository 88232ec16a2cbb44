// Test Server - Local HTTP server for real-browser integration tests
//
// Serves the same fixture pages the in-memory site models, as HTML with
// inline scripts, so scenarios can run offline against a real browser.

// Functions appear "unused" in test binaries that do not call them
#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Response, StatusCode, header},
    routing::get,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;

/// Test server handle
pub struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start the test server on a random available port
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/", get(index_page))
            .route("/button.html", get(button_page))
            .route("/form.html", get(form_page))
            .route("/text.html", get(text_page))
            .route("/download.html", get(download_page))
            .route("/files/report.csv", get(report_file));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to get local address");

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Test server failed");
        });

        TestServer { addr, handle }
    }

    /// Base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(self) {
        self.handle.abort();
    }
}

fn html(body: &'static str) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

async fn index_page() -> Response<Body> {
    html(
        r#"<!DOCTYPE html>
<html>
<head><title>QA Home</title></head>
<body>
  <h1>Fixtures</h1>
  <a href="/button.html">Buttons</a>
</body>
</html>"#,
    )
}

async fn button_page() -> Response<Body> {
    html(
        r#"<!DOCTYPE html>
<html>
<head><title>Buttons</title></head>
<body>
  <div data-testid="single-click-example">
    <button data-testid="single-click"
      onclick="document.querySelector('[data-testid=click-count]').textContent = event.detail">Click</button>
    <span data-testid="click-count">0</span>
  </div>
  <button data-testid="rightclick-count"
    oncontextmenu="event.preventDefault(); this.textContent = event.detail">0</button>
  <button data-testid="dbclick-count"
    ondblclick="this.textContent = Number(this.textContent) + 1">0</button>
  <button id="disabled-button" disabled>Disabled</button>
  <button data-testid="like-button" class="mx-1 px-2 rounded-md border-solid border border-amber-500"
    onclick="this.classList.toggle('bg-amber-500')">Like</button>
  <button id="enabled-later" disabled onclick="this.textContent = 'clicked'">Later</button>
  <script>
    setTimeout(() => { document.getElementById('enabled-later').disabled = false; }, 150);
    setTimeout(() => {
      const late = document.createElement('button');
      late.id = 'late';
      late.textContent = 'Late';
      late.onclick = () => { late.textContent = 'late clicked'; };
      document.body.appendChild(late);
    }, 150);
  </script>
</body>
</html>"#,
    )
}

async fn form_page() -> Response<Body> {
    html(
        r#"<!DOCTYPE html>
<html>
<head><title>Form</title></head>
<body>
  <label for="name">Name</label><input id="name" type="text">
  <textarea id="bio"></textarea>
  <input id="readonly" type="text" value="fixed" readonly>
  <label for="pets">Pet</label>
  <select id="pets">
    <option value="value-Bird">Bird</option>
    <option value="value-Cat">Cat</option>
    <option value="value-Dog">Dog</option>
  </select>
  <fieldset id="checkboxes">
    <label><input id="cb1" type="checkbox"> Option 1</label>
    <label><input id="cb2" type="checkbox"> Option 2</label>
    <label><input id="cb3" type="checkbox" disabled> Option 3</label>
  </fieldset>
  <input id="red" type="radio" name="color" checked><label for="red">Red</label>
  <input id="blue" type="radio" name="color"><label for="blue">Blue</label>
  <input id="green" type="radio" name="color" disabled><label for="green">Green</label>
  <input id="single" type="file">
</body>
</html>"#,
    )
}

async fn text_page() -> Response<Body> {
    html(
        r#"<!DOCTYPE html>
<html>
<head><title>Text</title></head>
<body>
  <nav><ul><li>ข่าว</li><li>บันเทิง</li><li>กีฬา</li></ul></nav>
  <div id="hidden-element" style="display:none"><p>Hello World!</p></div>
  <button id="reveal"
    onclick="setTimeout(() => document.getElementById('hidden-element').style.display = 'block', 100)">Reveal</button>
</body>
</html>"#,
    )
}

async fn download_page() -> Response<Body> {
    html(
        r#"<!DOCTYPE html>
<html>
<head><title>Downloads</title></head>
<body>
  <a id="report" href="/files/report.csv" download="report.csv">Download report</a>
  <a id="home" href="/">Home</a>
</body>
</html>"#,
    )
}

async fn report_file() -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv")
        .header(header::CONTENT_DISPOSITION, "attachment; filename=\"report.csv\"")
        .body(Body::from("id,total\n1,42\n"))
        .unwrap()
}
