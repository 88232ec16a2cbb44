// Action types and per-call options
//
// User-facing option structs for locator actions, plus the `Action` value a
// backend receives once the element has passed its actionability checks.

use crate::error::{Error, Result};
use base64::{Engine as _, engine::general_purpose};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mouse button for click actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    /// Left mouse button (default)
    #[default]
    Left,
    Right,
    Middle,
}

/// Options for `click`, `dblclick` and `right_click`
///
/// # Example
///
/// ```ignore
/// use e2e_harness::{ClickOptions, MouseButton};
///
/// let triple = ClickOptions::builder().click_count(3).build();
/// let context_menu = ClickOptions::builder().button(MouseButton::Right).build();
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickOptions {
    /// Mouse button to click (left, right, middle)
    pub button: Option<MouseButton>,
    /// Number of clicks, forwarded verbatim
    pub click_count: Option<u32>,
    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
}

impl ClickOptions {
    /// Create a new builder for ClickOptions
    pub fn builder() -> ClickOptionsBuilder {
        ClickOptionsBuilder::default()
    }
}

/// Builder for ClickOptions
#[derive(Debug, Clone, Default)]
pub struct ClickOptionsBuilder {
    button: Option<MouseButton>,
    click_count: Option<u32>,
    timeout: Option<Duration>,
}

impl ClickOptionsBuilder {
    /// Set the mouse button to click
    pub fn button(mut self, button: MouseButton) -> Self {
        self.button = Some(button);
        self
    }

    /// Set the number of clicks
    pub fn click_count(mut self, click_count: u32) -> Self {
        self.click_count = Some(click_count);
        self
    }

    /// Set the actionability timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the ClickOptions
    pub fn build(self) -> ClickOptions {
        ClickOptions {
            button: self.button,
            click_count: self.click_count,
            timeout: self.timeout,
        }
    }
}

/// Options shared by the remaining actions (hover, fill, press, check, ...)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionOptions {
    /// Overrides the configured default timeout
    pub timeout: Option<Duration>,
}

impl ActionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Which `<option>` to pick in `select_option`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectBy {
    /// Match by the option's `value` attribute
    Value(String),
    /// Match by the option's visible label
    Label(String),
    /// Zero-based position among the select's options
    Index(usize),
}

impl SelectBy {
    pub(crate) fn to_json(&self) -> Value {
        match self {
            SelectBy::Value(value) => json!({ "value": value }),
            SelectBy::Label(label) => json!({ "label": label }),
            SelectBy::Index(index) => json!({ "index": index }),
        }
    }

    /// Whether `option` (value, label, position) is the one asked for
    pub fn matches(&self, value: &str, label: &str, index: usize) -> bool {
        match self {
            SelectBy::Value(v) => v == value,
            SelectBy::Label(l) => l.trim() == label.trim(),
            SelectBy::Index(i) => *i == index,
        }
    }
}

impl From<&str> for SelectBy {
    fn from(value: &str) -> Self {
        SelectBy::Value(value.to_string())
    }
}

impl From<String> for SelectBy {
    fn from(value: String) -> Self {
        SelectBy::Value(value)
    }
}

impl From<usize> for SelectBy {
    fn from(index: usize) -> Self {
        SelectBy::Index(index)
    }
}

impl std::fmt::Display for SelectBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectBy::Value(v) => write!(f, "value={:?}", v),
            SelectBy::Label(l) => write!(f, "label={:?}", l),
            SelectBy::Index(i) => write!(f, "index={}", i),
        }
    }
}

/// One path or several for `set_input_files`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFiles {
    Single(PathBuf),
    Multiple(Vec<PathBuf>),
}

impl InputFiles {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            InputFiles::Single(path) => vec![path.as_path()],
            InputFiles::Multiple(paths) => paths.iter().map(PathBuf::as_path).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InputFiles::Single(_) => 1,
            InputFiles::Multiple(paths) => paths.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for InputFiles {
    fn from(path: &str) -> Self {
        InputFiles::Single(PathBuf::from(path))
    }
}

impl From<&Path> for InputFiles {
    fn from(path: &Path) -> Self {
        InputFiles::Single(path.to_path_buf())
    }
}

impl From<PathBuf> for InputFiles {
    fn from(path: PathBuf) -> Self {
        InputFiles::Single(path)
    }
}

impl From<&PathBuf> for InputFiles {
    fn from(path: &PathBuf) -> Self {
        InputFiles::Single(path.clone())
    }
}

impl From<Vec<PathBuf>> for InputFiles {
    fn from(paths: Vec<PathBuf>) -> Self {
        InputFiles::Multiple(paths)
    }
}

impl<P: AsRef<Path>> From<&[P]> for InputFiles {
    fn from(paths: &[P]) -> Self {
        InputFiles::Multiple(paths.iter().map(|p| p.as_ref().to_path_buf()).collect())
    }
}

impl<P: AsRef<Path>, const N: usize> From<[P; N]> for InputFiles {
    fn from(paths: [P; N]) -> Self {
        InputFiles::Multiple(paths.iter().map(|p| p.as_ref().to_path_buf()).collect())
    }
}

/// A file read from disk, ready to hand to a file input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    pub buffer: Vec<u8>,
}

impl FilePayload {
    /// Reads `path`; any I/O failure becomes `Error::FileAccessError`.
    pub async fn read(path: &Path) -> Result<Self> {
        let buffer = tokio::fs::read(path)
            .await
            .map_err(|source| Error::FileAccessError {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("invalid file path {}", path.display())))?
            .to_string();

        Ok(Self {
            mime_type: mime_type_for(&name).to_string(),
            name,
            buffer,
        })
    }

    pub(crate) fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "mimeType": self.mime_type,
            "buffer": general_purpose::STANDARD.encode(&self.buffer),
        })
    }
}

fn mime_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// A user-intent operation ready for dispatch to a backend
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click {
        button: MouseButton,
        click_count: u32,
    },
    DoubleClick {
        button: MouseButton,
    },
    Hover,
    Fill(String),
    Press(String),
    SetChecked(bool),
    SelectOption(SelectBy),
    SetInputFiles(Vec<FilePayload>),
}

impl Action {
    /// Short operation name used in logs and diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Action::Click {
                button: MouseButton::Right,
                ..
            } => "right_click",
            Action::Click { .. } => "click",
            Action::DoubleClick { .. } => "dblclick",
            Action::Hover => "hover",
            Action::Fill(text) if text.is_empty() => "clear",
            Action::Fill(_) => "fill",
            Action::Press(_) => "press",
            Action::SetChecked(true) => "check",
            Action::SetChecked(false) => "uncheck",
            Action::SelectOption(_) => "select_option",
            Action::SetInputFiles(_) => "set_input_files",
        }
    }

    /// Operation name plus its argument, e.g. `fill("Hello")`
    pub fn describe(&self) -> String {
        match self {
            Action::Click {
                button,
                click_count,
            } if *click_count != 1 || *button == MouseButton::Middle => {
                format!("click(button={:?}, count={})", button, click_count)
            }
            Action::Fill(text) if !text.is_empty() => format!("fill({:?})", text),
            Action::Press(key) => format!("press({:?})", key),
            Action::SelectOption(by) => format!("select_option({})", by),
            Action::SetInputFiles(files) => format!(
                "set_input_files({})",
                files
                    .iter()
                    .map(|f| f.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            other => other.name().to_string(),
        }
    }
}
