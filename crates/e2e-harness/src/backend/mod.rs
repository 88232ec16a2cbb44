// Page backends
//
// The seam between the harness and a live DOM. A backend answers snapshot
// queries for a selector, dispatches an already-validated action, navigates,
// and publishes page events. Actionability and retry policy live above this
// layer, so every backend behaves the same under the executor.
//
// - remote: a real browser behind the Playwright driver
// - memory: a scripted in-process document for deterministic tests

pub mod memory;
pub mod remote;

use crate::actions::Action;
use crate::error::Result;
use crate::events::PageEvent;
use crate::selector::Selector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Load milestones a navigation passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    /// The `load` event fired
    Load,
    /// The `DOMContentLoaded` event fired
    DomContentLoaded,
    /// No network activity for at least 500ms
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

/// Layout rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, (px, py): (f64, f64)) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

/// One `<option>` of a select element
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionState {
    pub value: String,
    pub label: String,
    pub selected: bool,
}

/// Snapshot of one matched element at one instant.
///
/// Form-control fields (`input_type`, `enabled`, `editable`, `checked`,
/// `multiple`, `value`, `options`) describe the labelled control when the
/// match is a `<label>`. Never cached across operations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementState {
    /// Lowercase tag name
    pub tag: String,
    /// `type` of an `<input>`, lowercased
    pub input_type: Option<String>,
    pub attached: bool,
    pub visible: bool,
    pub enabled: bool,
    pub editable: bool,
    /// `Some` for checkboxes and radios only
    pub checked: Option<bool>,
    pub multiple: bool,
    /// Current value of input, textarea and select controls
    pub value: Option<String>,
    pub inner_text: String,
    pub text_content: String,
    pub attributes: BTreeMap<String, String>,
    pub bounding_box: Option<BoundingBox>,
    /// Another element receives pointer events at the element's center
    pub obscured: bool,
    pub options: Vec<OptionState>,
}

impl ElementState {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn is_radio(&self) -> bool {
        self.input_type.as_deref() == Some("radio")
    }

    /// `<input type=file>`, directly or through its label
    pub fn is_file_input(&self) -> bool {
        self.input_type.as_deref() == Some("file")
    }
}

/// One page of a browser, as seen by the harness
#[async_trait]
pub trait PageBackend: Send + Sync {
    /// Navigates and waits for the `load` event
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    /// History back; a no-op when there is no previous entry
    async fn go_back(&self, timeout: Duration) -> Result<()>;

    /// History forward; a no-op when there is no next entry
    async fn go_forward(&self, timeout: Duration) -> Result<()>;

    async fn url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    /// Snapshots every element `selector` currently resolves to, in document order
    async fn query(&self, selector: &Selector) -> Result<Vec<ElementState>>;

    /// Performs `action` on the single element `selector` resolves to.
    ///
    /// The caller has already waited for actionability; backends must not
    /// wait again.
    async fn dispatch(&self, selector: &Selector, action: &Action, timeout: Duration)
    -> Result<()>;

    /// Subscribes to page events published after this call
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    async fn close(&self) -> Result<()>;
}

/// A browser that hands out isolated pages
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    /// Creates a fresh page in its own context; no state is shared with
    /// earlier pages
    async fn new_page(&self) -> Result<Arc<dyn PageBackend>>;

    async fn shutdown(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_state_from_snapshot_json() {
        let json = serde_json::json!({
            "tag": "input",
            "inputType": "checkbox",
            "attached": true,
            "visible": true,
            "enabled": false,
            "checked": false,
            "innerText": "",
            "textContent": "",
            "attributes": {"id": "cb3", "disabled": ""},
            "boundingBox": {"x": 1.0, "y": 2.0, "width": 13.0, "height": 13.0}
        });

        let state: ElementState = serde_json::from_value(json).unwrap();
        assert_eq!(state.tag, "input");
        assert_eq!(state.checked, Some(false));
        assert!(!state.enabled);
        assert!(!state.obscured);
        assert_eq!(state.attribute("id"), Some("cb3"));
        assert!(state.options.is_empty());
        assert_eq!(state.bounding_box.unwrap().center(), (7.5, 8.5));
    }

    #[test]
    fn test_bounding_box_geometry() {
        let b = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains((5.0, 5.0)));
        assert!(!b.contains((11.0, 5.0)));
        assert!(BoundingBox::new(0.0, 0.0, 0.0, 10.0).is_empty());
    }
}
