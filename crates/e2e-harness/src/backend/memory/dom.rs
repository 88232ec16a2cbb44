// In-memory document model
//
// An arena of element and text nodes with just enough browser behavior for
// the harness to be exercised without a browser: visibility from `hidden` and
// inline styles, synthetic layout, label association, disabled fieldsets,
// event bubbling to registered handlers, timers, and the default actions of
// checkboxes, radios, options and links.

use crate::actions::MouseButton;
use crate::backend::{BoundingBox, OptionState};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Handle to a node in a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Event handler registered with [`Document::on`]
pub type Handler = Arc<dyn Fn(&mut Document, &DomEvent) + Send + Sync>;

/// Deferred mutation registered with [`Document::after`]
pub type Timer = Arc<dyn Fn(&mut Document) + Send + Sync>;

/// An event delivered to handlers while it bubbles from `target` to the root
#[derive(Debug, Clone)]
pub struct DomEvent {
    pub kind: String,
    pub target: NodeId,
    /// Node whose handler is running
    pub current: NodeId,
    /// Click count for mouse events
    pub detail: u32,
    pub button: MouseButton,
    pub key: Option<String>,
}

/// Page-level side effect of a default action, applied by the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Effect {
    Navigate(String),
    Download { url: String, filename: String },
}

#[derive(Debug, Clone, Default)]
struct ElementData {
    tag: String,
    attrs: BTreeMap<String, String>,
    value: String,
    checked: bool,
    selected: bool,
    files: Vec<String>,
    layout: Option<BoundingBox>,
    overlay: bool,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Element(ElementData),
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: NodeKind,
}

/// Declarative element description for [`Document::append`]
#[derive(Debug, Clone, Default)]
pub struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Child>,
    layout: Option<BoundingBox>,
}

#[derive(Debug, Clone)]
enum Child {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(self, class: &str) -> Self {
        self.attr("class", class)
    }

    pub fn test_id(self, id: &str) -> Self {
        self.attr("data-testid", id)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(Child::Text(text.to_string()));
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Child::Element(child));
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children
            .extend(children.into_iter().map(Child::Element));
        self
    }

    /// Fixed layout box instead of the synthetic one
    pub fn layout(mut self, bbox: BoundingBox) -> Self {
        self.layout = Some(bbox);
        self
    }
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "div", "dl", "dt", "dd", "fieldset", "figure",
    "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "tr", "ul",
];

const NEVER_RENDERED: &[&str] = &[
    "head", "title", "script", "style", "meta", "link", "template", "noscript",
];

const FORM_CONTROLS: &[&str] = &[
    "button", "input", "select", "textarea", "option", "optgroup", "fieldset",
];

/// A scripted DOM
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    url: String,
    handlers: HashMap<(NodeId, String), Vec<Handler>>,
    pub(crate) timers: Vec<(Duration, Timer)>,
    pub(crate) effects: Vec<Effect>,
    hovered: Option<NodeId>,
    focused: Option<NodeId>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("url", &self.url)
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            head: NodeId(0),
            body: NodeId(0),
            url: "about:blank".to_string(),
            handlers: HashMap::new(),
            timers: Vec::new(),
            effects: Vec::new(),
            hovered: None,
            focused: None,
        };
        doc.root = doc.alloc(None, element_kind("html"));
        doc.head = doc.alloc(Some(doc.root), element_kind("head"));
        doc.body = doc.alloc(Some(doc.root), element_kind("body"));
        doc
    }

    fn alloc(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent,
            children: Vec::new(),
            kind,
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(id);
        }
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub(crate) fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }

    /// Sets `<title>`, creating it in `<head>` when missing
    pub fn set_title(&mut self, title: &str) {
        let existing = self
            .children(self.head)
            .into_iter()
            .find(|id| self.tag(*id) == Some("title"));
        let id = match existing {
            Some(id) => id,
            None => self.append(self.head, Element::new("title")),
        };
        self.set_text(id, title);
    }

    pub fn title(&self) -> String {
        self.children(self.head)
            .into_iter()
            .find(|id| self.tag(*id) == Some("title"))
            .map(|id| normalize_whitespace(&self.text_content(id)))
            .unwrap_or_default()
    }

    /// Builds `element` and its subtree under `parent`
    pub fn append(&mut self, parent: NodeId, element: Element) -> NodeId {
        let mut data = ElementData {
            tag: element.tag.clone(),
            layout: element.layout,
            ..Default::default()
        };
        for (name, value) in &element.attrs {
            data.attrs.insert(name.clone(), value.clone());
        }
        data.value = data.attrs.get("value").cloned().unwrap_or_default();
        data.checked = data.attrs.contains_key("checked");
        data.selected = data.attrs.contains_key("selected");

        let id = self.alloc(Some(parent), NodeKind::Element(data));
        for child in element.children {
            match child {
                Child::Element(child) => {
                    self.append(id, child);
                }
                Child::Text(text) => {
                    self.alloc(Some(id), NodeKind::Text(text));
                }
            }
        }
        if self.tag(id) == Some("textarea") {
            let text = self.text_content(id);
            if let Some(data) = self.data_mut(id) {
                data.value = text;
            }
        }
        id
    }

    /// Appends a text node
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.alloc(Some(parent), NodeKind::Text(text.to_string()))
    }

    /// Detaches `id` and its subtree
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    /// Replaces all children of `id` with one text node
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        self.alloc(Some(id), NodeKind::Text(text.to_string()));
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(data) = self.data_mut(id) {
            data.attrs.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(data) = self.data_mut(id) {
            data.attrs.remove(&name.to_ascii_lowercase());
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.data(id)?.attrs.get(name).map(String::as_str)
    }

    pub(crate) fn attrs(&self, id: NodeId) -> BTreeMap<String, String> {
        self.data(id).map(|d| d.attrs.clone()).unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }

    /// Pins the layout box of `id`
    pub fn set_layout(&mut self, id: NodeId, bbox: BoundingBox) {
        if let Some(data) = self.data_mut(id) {
            data.layout = Some(bbox);
        }
    }

    /// Marks `id` as floating above in-flow content
    pub fn set_overlay(&mut self, id: NodeId, overlay: bool) {
        if let Some(data) = self.data_mut(id) {
            data.overlay = overlay;
        }
    }

    /// Registers a handler for events of `kind` reaching `id`
    pub fn on<F>(&mut self, id: NodeId, kind: &str, handler: F)
    where
        F: Fn(&mut Document, &DomEvent) + Send + Sync + 'static,
    {
        self.handlers
            .entry((id, kind.to_string()))
            .or_default()
            .push(Arc::new(handler));
    }

    /// Runs `f` against this page's document after `delay`
    pub fn after<F>(&mut self, delay: Duration, f: F)
    where
        F: Fn(&mut Document) + Send + Sync + 'static,
    {
        self.timers.push((delay, Arc::new(f)));
    }

    pub fn by_id(&self, id: &str) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|n| self.attr(*n, "id") == Some(id))
    }

    /// Elements matching a CSS selector, in document order
    pub fn select(&self, css: &str) -> Vec<NodeId> {
        super::matcher::select_css(self, css).unwrap_or_default()
    }

    // Tree access

    fn data(&self, id: NodeId) -> Option<&ElementData> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text(_) => None,
        }
    }

    fn data_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match &mut self.nodes.get_mut(id.0)?.kind {
            NodeKind::Element(data) => Some(data),
            NodeKind::Text(_) => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.data(id).map(|d| d.tag.as_str())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.0)?.parent
    }

    /// Child elements of `id`
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|c| self.data(*c).is_some())
            .collect()
    }

    pub(crate) fn child_nodes(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub(crate) fn text_of_node(&self, id: NodeId) -> Option<&str> {
        match &self.nodes.get(id.0)?.kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element(_) => None,
        }
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(node) = cursor {
            if node == self.root {
                return true;
            }
            cursor = self.parent(node);
        }
        false
    }

    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id);
        while let Some(node) = cursor {
            out.push(node);
            cursor = self.parent(node);
        }
        out
    }

    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// All attached elements in document order, the root included
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = vec![self.root];
        self.collect_descendants(self.root, &mut out);
        out
    }

    /// Descendant elements of `id` in document order, `id` excluded
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_descendants(id, &mut out);
        out
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            out.push(child);
            self.collect_descendants(child, out);
        }
    }

    // Text

    /// Concatenated text of every descendant text node
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, false, &mut out);
        out
    }

    /// Text of rendered descendants, whitespace-collapsed
    pub(crate) fn rendered_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, true, &mut out);
        normalize_whitespace(&out)
    }

    fn collect_text(&self, id: NodeId, rendered_only: bool, out: &mut String) {
        for child in &self.nodes[id.0].children {
            match &self.nodes[child.0].kind {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element(data) => {
                    if rendered_only
                        && (self.hidden_by_style(*child)
                            || data.tag == "script"
                            || data.tag == "style")
                    {
                        continue;
                    }
                    self.collect_text(*child, rendered_only, out);
                }
            }
        }
    }

    /// Browser `innerText`: the rendered text with block boundaries as
    /// newlines, or `textContent` when the element itself is not rendered
    pub fn inner_text(&self, id: NodeId) -> String {
        if !self.is_rendered(id) {
            return self.text_content(id);
        }
        let mut raw = String::new();
        self.collect_inner_text(id, &mut raw);
        raw.lines()
            .map(normalize_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn collect_inner_text(&self, id: NodeId, out: &mut String) {
        for child in &self.nodes[id.0].children {
            match &self.nodes[child.0].kind {
                NodeKind::Text(text) => out.push_str(&text.replace('\n', " ")),
                NodeKind::Element(data) => {
                    if self.hidden_by_style(*child) || NEVER_RENDERED.contains(&data.tag.as_str())
                    {
                        continue;
                    }
                    if data.tag == "br" {
                        out.push('\n');
                        continue;
                    }
                    let block = BLOCK_TAGS.contains(&data.tag.as_str());
                    if block {
                        out.push('\n');
                    }
                    self.collect_inner_text(*child, out);
                    if block {
                        out.push('\n');
                    }
                }
            }
        }
    }

    // Rendering

    fn style(&self, id: NodeId) -> HashMap<String, String> {
        self.attr(id, "style")
            .map(|style| {
                style
                    .split(';')
                    .filter_map(|decl| {
                        let (name, value) = decl.split_once(':')?;
                        Some((
                            name.trim().to_ascii_lowercase(),
                            value.trim().to_ascii_lowercase(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn hidden_by_style(&self, id: NodeId) -> bool {
        let Some(data) = self.data(id) else {
            return false;
        };
        if data.attrs.contains_key("hidden") {
            return true;
        }
        if data.tag == "input" && self.input_type(id).as_deref() == Some("hidden") {
            return true;
        }
        let style = self.style(id);
        style.get("display").is_some_and(|d| d == "none")
            || style.get("visibility").is_some_and(|v| v == "hidden")
    }

    /// Laid out at all: attached, not hidden by attribute or style anywhere
    /// up the tree, and outside `<head>`
    pub fn is_rendered(&self, id: NodeId) -> bool {
        if !self.is_attached(id) {
            return false;
        }
        let chain = std::iter::once(id).chain(self.ancestors(id));
        for node in chain {
            if node == self.head {
                return false;
            }
            if let Some(tag) = self.tag(node) {
                if NEVER_RENDERED.contains(&tag) {
                    return false;
                }
            }
            if self.hidden_by_style(node) {
                return false;
            }
        }
        true
    }

    /// Hidden from the accessibility tree
    pub(crate) fn is_aria_hidden(&self, id: NodeId) -> bool {
        !self.is_rendered(id)
            || std::iter::once(id)
                .chain(self.ancestors(id))
                .any(|n| self.attr(n, "aria-hidden") == Some("true"))
    }

    /// Layout box, or `None` when not rendered
    pub fn layout(&self, id: NodeId) -> Option<BoundingBox> {
        if !self.is_rendered(id) {
            return None;
        }
        if self.tag(id) == Some("option") {
            let select = self.enclosing(id, "select")?;
            return self.layout(select);
        }
        if let Some(bbox) = self.data(id)?.layout {
            return Some(bbox);
        }
        let index = self.elements().iter().position(|n| *n == id)?;
        let depth = self.ancestors(id).len();
        Some(BoundingBox::new(
            8.0 * depth as f64,
            24.0 * index as f64,
            (800.0 - 16.0 * depth as f64).max(40.0),
            20.0,
        ))
    }

    pub fn is_visible(&self, id: NodeId) -> bool {
        self.layout(id).is_some_and(|b| !b.is_empty())
    }

    /// Some visible overlay covers the center of `id`
    pub fn is_obscured(&self, id: NodeId) -> bool {
        let Some(bbox) = self.layout(id) else {
            return false;
        };
        let center = bbox.center();
        self.elements().into_iter().any(|other| {
            other != id
                && self.data(other).is_some_and(|d| d.overlay)
                && !self.is_ancestor(other, id)
                && !self.is_ancestor(id, other)
                && self.layout(other).is_some_and(|b| b.contains(center))
        })
    }

    // Form controls

    pub fn input_type(&self, id: NodeId) -> Option<String> {
        if self.tag(id)? != "input" {
            return None;
        }
        Some(
            self.attr(id, "type")
                .map(|t| t.to_ascii_lowercase())
                .unwrap_or_else(|| "text".to_string()),
        )
    }

    fn is_labelable(&self, id: NodeId) -> bool {
        match self.tag(id) {
            Some("button" | "select" | "textarea" | "meter" | "output" | "progress") => true,
            Some("input") => self.input_type(id).as_deref() != Some("hidden"),
            _ => false,
        }
    }

    /// The control a `<label>` is bound to, via `for` or nesting
    pub fn label_control(&self, label: NodeId) -> Option<NodeId> {
        if self.tag(label) != Some("label") {
            return None;
        }
        if let Some(target) = self.attr(label, "for").and_then(|f| self.by_id(f)) {
            return self.is_labelable(target).then_some(target);
        }
        self.descendants(label)
            .into_iter()
            .find(|c| self.is_labelable(*c))
    }

    /// Labels bound to `control`
    pub(crate) fn labels_of(&self, control: NodeId) -> Vec<NodeId> {
        self.elements()
            .into_iter()
            .filter(|n| self.tag(*n) == Some("label") && self.label_control(*n) == Some(control))
            .collect()
    }

    /// The element a form-control operation acts on: the bound control for
    /// a label, the element itself otherwise
    pub fn retarget(&self, id: NodeId) -> NodeId {
        self.label_control(id).unwrap_or(id)
    }

    pub fn is_disabled(&self, id: NodeId) -> bool {
        if self.attr(id, "aria-disabled") == Some("true") {
            return true;
        }
        let Some(tag) = self.tag(id) else {
            return false;
        };
        if !FORM_CONTROLS.contains(&tag) {
            return false;
        }
        if self.attr(id, "disabled").is_some() {
            return true;
        }
        if tag == "option" {
            if let Some(select) = self.enclosing(id, "select") {
                return self.is_disabled(select);
            }
        }
        self.ancestors(id).into_iter().any(|a| {
            self.tag(a) == Some("fieldset") && self.attr(a, "disabled").is_some()
        })
    }

    pub fn is_editable(&self, id: NodeId) -> bool {
        if self.is_disabled(id) || self.attr(id, "readonly").is_some() {
            return false;
        }
        match self.tag(id) {
            Some("textarea" | "select") => true,
            Some("input") => !matches!(
                self.input_type(id).as_deref(),
                Some(
                    "checkbox" | "radio" | "button" | "submit" | "reset" | "file" | "image"
                        | "hidden" | "range" | "color"
                )
            ),
            _ => self
                .attr(id, "contenteditable")
                .is_some_and(|v| v.is_empty() || v == "true"),
        }
    }

    /// `Some` for checkboxes, radios and `aria-checked` widgets
    pub fn checked_state(&self, id: NodeId) -> Option<bool> {
        match self.input_type(id).as_deref() {
            Some("checkbox" | "radio") => self.data(id).map(|d| d.checked),
            _ => self.attr(id, "aria-checked").map(|v| v == "true"),
        }
    }

    pub fn is_checked(&self, id: NodeId) -> bool {
        self.checked_state(id).unwrap_or(false)
    }

    /// Sets checkedness directly, without events
    pub fn set_checked(&mut self, id: NodeId, checked: bool) {
        if let Some(data) = self.data_mut(id) {
            data.checked = checked;
        }
    }

    fn enclosing(&self, id: NodeId, tag: &str) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|a| self.tag(*a) == Some(tag))
    }

    fn option_nodes(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .filter(|n| self.tag(*n) == Some("option"))
            .collect()
    }

    fn option_label(&self, option: NodeId) -> String {
        self.attr(option, "label")
            .map(str::to_string)
            .unwrap_or_else(|| normalize_whitespace(&self.text_content(option)))
    }

    fn option_value(&self, option: NodeId) -> String {
        self.attr(option, "value")
            .map(str::to_string)
            .unwrap_or_else(|| normalize_whitespace(&self.text_content(option)))
    }

    fn is_dropdown(&self, select: NodeId) -> bool {
        self.attr(select, "multiple").is_none()
            && self
                .attr(select, "size")
                .and_then(|s| s.parse::<u32>().ok())
                .is_none_or(|size| size <= 1)
    }

    fn selected_options(&self, select: NodeId) -> Vec<NodeId> {
        let options = self.option_nodes(select);
        let selected: Vec<NodeId> = options
            .iter()
            .copied()
            .filter(|o| self.data(*o).is_some_and(|d| d.selected))
            .collect();
        if selected.is_empty() && self.is_dropdown(select) {
            return options.into_iter().take(1).collect();
        }
        selected
    }

    pub(crate) fn options(&self, select: NodeId) -> Vec<OptionState> {
        if self.tag(select) != Some("select") {
            return Vec::new();
        }
        let selected = self.selected_options(select);
        self.option_nodes(select)
            .into_iter()
            .map(|o| OptionState {
                value: self.option_value(o),
                label: self.option_label(o),
                selected: selected.contains(&o),
            })
            .collect()
    }

    /// Current value of an input, textarea or select
    pub fn value(&self, id: NodeId) -> Option<String> {
        match self.tag(id)? {
            "input" => {
                let data = self.data(id)?;
                if self.input_type(id).as_deref() == Some("file") {
                    return Some(
                        data.files
                            .first()
                            .map(|f| format!("C:\\fakepath\\{}", f))
                            .unwrap_or_default(),
                    );
                }
                if matches!(self.input_type(id).as_deref(), Some("checkbox" | "radio"))
                    && !data.attrs.contains_key("value")
                {
                    return Some("on".to_string());
                }
                Some(data.value.clone())
            }
            "textarea" => Some(self.data(id)?.value.clone()),
            "select" => Some(
                self.selected_options(id)
                    .first()
                    .map(|o| self.option_value(*o))
                    .unwrap_or_default(),
            ),
            "option" => Some(self.option_value(id)),
            _ => None,
        }
    }

    /// Sets a control's value directly, without events
    pub fn set_value(&mut self, id: NodeId, value: &str) {
        if self.attr(id, "contenteditable").is_some() {
            self.set_text(id, value);
        } else if let Some(data) = self.data_mut(id) {
            data.value = value.to_string();
        }
    }

    /// Names of the files chosen in a file input
    pub fn files(&self, id: NodeId) -> Vec<String> {
        self.data(id).map(|d| d.files.clone()).unwrap_or_default()
    }

    pub fn hovered(&self) -> Option<NodeId> {
        self.hovered
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    // Events

    /// Delivers `kind` to handlers on `target` and each ancestor
    pub fn dispatch_event(&mut self, target: NodeId, kind: &str) {
        self.fire(target, kind, 0, MouseButton::Left, None);
    }

    fn fire(
        &mut self,
        target: NodeId,
        kind: &str,
        detail: u32,
        button: MouseButton,
        key: Option<&str>,
    ) {
        let path: Vec<NodeId> = std::iter::once(target).chain(self.ancestors(target)).collect();
        for current in path {
            let handlers = self
                .handlers
                .get(&(current, kind.to_string()))
                .cloned()
                .unwrap_or_default();
            if handlers.is_empty() {
                continue;
            }
            let event = DomEvent {
                kind: kind.to_string(),
                target,
                current,
                detail,
                button,
                key: key.map(str::to_string),
            };
            for handler in handlers {
                handler(self, &event);
            }
        }
    }

    /// One mouse click with browser default actions
    pub(crate) fn click(&mut self, target: NodeId, button: MouseButton, detail: u32) {
        if self.is_disabled(target) {
            return;
        }
        self.fire(target, "mousedown", detail, button, None);
        self.fire(target, "mouseup", detail, button, None);
        match button {
            MouseButton::Left => {
                self.focused = Some(target);
                self.fire(target, "click", detail, button, None);
                self.activate(target, detail);
            }
            MouseButton::Right => self.fire(target, "contextmenu", detail, button, None),
            MouseButton::Middle => self.fire(target, "auxclick", detail, button, None),
        }
    }

    fn activate(&mut self, target: NodeId, detail: u32) {
        let chain: Vec<NodeId> = std::iter::once(target).chain(self.ancestors(target)).collect();
        for node in chain {
            let tag = self.tag(node).map(str::to_string);
            match tag.as_deref() {
                Some("input") => {
                    match self.input_type(node).as_deref() {
                        Some("checkbox") => {
                            let checked = self.is_checked(node);
                            self.set_checked(node, !checked);
                            self.fire_change(node);
                        }
                        Some("radio") if !self.is_checked(node) => {
                            self.check_radio(node);
                            self.fire_change(node);
                        }
                        _ => {}
                    }
                    return;
                }
                Some("option") => {
                    if let Some(select) = self.enclosing(node, "select") {
                        if !self.is_disabled(node) {
                            self.select_nodes(select, &[node]);
                            self.fire_change(select);
                        }
                    }
                    return;
                }
                Some("a") => {
                    if let Some(href) = self.attr(node, "href").map(str::to_string) {
                        let url = self.resolve_url(&href);
                        let effect = match self.attr(node, "download") {
                            Some(name) if !name.is_empty() => Effect::Download {
                                url,
                                filename: name.to_string(),
                            },
                            Some(_) => Effect::Download {
                                filename: url.rsplit('/').next().unwrap_or_default().to_string(),
                                url,
                            },
                            None => Effect::Navigate(url),
                        };
                        self.effects.push(effect);
                    }
                    return;
                }
                Some("label") => {
                    if let Some(control) = self.label_control(node) {
                        if control != target && !self.is_ancestor(control, target) {
                            self.click(control, MouseButton::Left, detail);
                        }
                    }
                    return;
                }
                Some("button") | Some("select") | Some("textarea") => return,
                _ => {}
            }
        }
    }

    fn check_radio(&mut self, radio: NodeId) {
        let name = self.attr(radio, "name").map(str::to_string);
        if let Some(name) = name {
            for other in self.elements() {
                if other != radio
                    && self.input_type(other).as_deref() == Some("radio")
                    && self.attr(other, "name") == Some(name.as_str())
                {
                    self.set_checked(other, false);
                }
            }
        }
        self.set_checked(radio, true);
    }

    fn fire_change(&mut self, id: NodeId) {
        self.fire(id, "input", 0, MouseButton::Left, None);
        self.fire(id, "change", 0, MouseButton::Left, None);
    }

    fn select_nodes(&mut self, select: NodeId, chosen: &[NodeId]) {
        for option in self.option_nodes(select) {
            let selected = chosen.contains(&option);
            if let Some(data) = self.data_mut(option) {
                data.selected = selected;
            }
        }
    }

    pub(crate) fn hover(&mut self, target: NodeId) {
        self.hovered = Some(target);
        self.fire(target, "mouseover", 0, MouseButton::Left, None);
        self.fire(target, "mouseenter", 0, MouseButton::Left, None);
    }

    pub(crate) fn fill(&mut self, target: NodeId, text: &str) {
        self.focused = Some(target);
        self.set_value(target, text);
        self.fire_change(target);
    }

    pub(crate) fn press(&mut self, target: NodeId, key: &str) {
        self.focused = Some(target);
        self.fire(target, "keydown", 0, MouseButton::Left, Some(key));
        if self.is_editable(target) {
            let mut value = self.value(target).unwrap_or_default();
            let changed = match key {
                "Backspace" => value.pop().is_some(),
                k if k.chars().count() == 1 => {
                    value.push_str(k);
                    true
                }
                _ => false,
            };
            if changed {
                self.set_value(target, &value);
                self.fire(target, "input", 0, MouseButton::Left, None);
            }
        }
        self.fire(target, "keyup", 0, MouseButton::Left, Some(key));
    }

    /// Selects the first option matching `by`; false when nothing matches
    pub(crate) fn select_option(&mut self, select: NodeId, by: &crate::actions::SelectBy) -> bool {
        let options = self.option_nodes(select);
        let chosen = options.iter().enumerate().find(|(index, option)| {
            by.matches(
                &self.option_value(**option),
                &self.option_label(**option),
                *index,
            )
        });
        match chosen {
            Some((_, option)) => {
                let option = *option;
                self.select_nodes(select, &[option]);
                self.fire_change(select);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_files(&mut self, input: NodeId, names: Vec<String>) {
        if let Some(data) = self.data_mut(input) {
            data.files = names;
        }
        self.fire_change(input);
    }

    fn resolve_url(&self, href: &str) -> String {
        url::Url::parse(&self.url)
            .and_then(|base| base.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string())
    }
}

fn element_kind(tag: &str) -> NodeKind {
    NodeKind::Element(ElementData {
        tag: tag.to_string(),
        ..Default::default()
    })
}

/// Collapses whitespace runs to one space and trims
pub(crate) fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn form() -> (Document, NodeId, NodeId, NodeId) {
        let mut doc = Document::new();
        let fieldset = doc.append(
            doc.body(),
            Element::new("fieldset")
                .attr("disabled", "")
                .child(Element::new("input").id("inner").attr("type", "text")),
        );
        let label = doc.append(
            doc.body(),
            Element::new("label")
                .text("Default checkbox ")
                .child(Element::new("input").id("cb").attr("type", "checkbox")),
        );
        let cb = doc.by_id("cb").unwrap();
        (doc, fieldset, label, cb)
    }

    #[test]
    fn test_disabled_fieldset_and_label_binding() {
        let (doc, _fieldset, label, cb) = form();
        let inner = doc.by_id("inner").unwrap();
        assert!(doc.is_disabled(inner));
        assert!(!doc.is_editable(inner));
        assert_eq!(doc.label_control(label), Some(cb));
        assert_eq!(doc.retarget(label), cb);
        assert_eq!(doc.labels_of(cb), vec![label]);
    }

    #[test]
    fn test_label_click_toggles_checkbox_once() {
        let (mut doc, _, label, cb) = form();
        doc.click(label, MouseButton::Left, 1);
        assert!(doc.is_checked(cb));
        doc.click(cb, MouseButton::Left, 1);
        assert!(!doc.is_checked(cb));
    }

    #[test]
    fn test_radio_group_exclusivity() {
        let mut doc = Document::new();
        let a = doc.append(
            doc.body(),
            Element::new("input").attr("type", "radio").attr("name", "g").attr("checked", ""),
        );
        let b = doc.append(
            doc.body(),
            Element::new("input").attr("type", "radio").attr("name", "g"),
        );
        doc.click(b, MouseButton::Left, 1);
        assert!(!doc.is_checked(a));
        assert!(doc.is_checked(b));
        doc.click(b, MouseButton::Left, 1);
        assert!(doc.is_checked(b));
    }

    #[test]
    fn test_inner_text_skips_hidden_text() {
        let mut doc = Document::new();
        let div = doc.append(
            doc.body(),
            Element::new("div")
                .text("Visible ")
                .child(Element::new("span").attr("style", "display: none").text("Hidden")),
        );
        assert_eq!(doc.inner_text(div), "Visible");
        assert_eq!(doc.text_content(div), "Visible Hidden");

        let hidden = doc.append(
            doc.body(),
            Element::new("p").attr("hidden", "").text("  secret  "),
        );
        assert_eq!(doc.inner_text(hidden), "  secret  ");
        assert!(!doc.is_visible(hidden));
    }

    #[test]
    fn test_inner_text_block_boundaries() {
        let mut doc = Document::new();
        let ul = doc.append(
            doc.body(),
            Element::new("ul")
                .child(Element::new("li").text("One"))
                .child(Element::new("li").text("Two")),
        );
        assert_eq!(doc.inner_text(ul), "One\nTwo");
    }

    #[test]
    fn test_handlers_bubble() {
        let mut doc = Document::new();
        let hits = Arc::new(AtomicU32::new(0));
        let list = doc.append(
            doc.body(),
            Element::new("ul").child(Element::new("li").id("item").text("x")),
        );
        let item = doc.by_id("item").unwrap();
        let seen = hits.clone();
        doc.on(list, "click", move |_, ev| {
            assert_eq!(ev.target, item);
            seen.fetch_add(ev.detail, Ordering::SeqCst);
        });
        doc.click(item, MouseButton::Left, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_select_value_defaults_to_first_option() {
        let mut doc = Document::new();
        let select = doc.append(
            doc.body(),
            Element::new("select")
                .child(Element::new("option").attr("value", "value-Bird").text("Bird"))
                .child(Element::new("option").attr("value", "value-Cat").text("Cat")),
        );
        assert_eq!(doc.value(select).as_deref(), Some("value-Bird"));
        assert!(doc.select_option(select, &crate::actions::SelectBy::Label("Cat".into())));
        assert_eq!(doc.value(select).as_deref(), Some("value-Cat"));
        assert!(!doc.select_option(select, &crate::actions::SelectBy::Index(7)));
    }

    #[test]
    fn test_download_link_effect() {
        let mut doc = Document::new();
        doc.set_url("https://demo.test/files/");
        let link = doc.append(
            doc.body(),
            Element::new("a").attr("href", "report.pdf").attr("download", "").text("Get"),
        );
        doc.click(link, MouseButton::Left, 1);
        assert_eq!(
            doc.effects,
            vec![Effect::Download {
                url: "https://demo.test/files/report.pdf".into(),
                filename: "report.pdf".into()
            }]
        );
    }

    #[test]
    fn test_overlay_obscures() {
        let mut doc = Document::new();
        let button = doc.append(
            doc.body(),
            Element::new("button").layout(BoundingBox::new(10.0, 10.0, 80.0, 20.0)),
        );
        let modal = doc.append(
            doc.body(),
            Element::new("div").layout(BoundingBox::new(0.0, 0.0, 400.0, 400.0)),
        );
        assert!(!doc.is_obscured(button));
        doc.set_overlay(modal, true);
        assert!(doc.is_obscured(button));
        doc.set_attr(modal, "style", "display:none");
        assert!(!doc.is_obscured(button));
    }
}
