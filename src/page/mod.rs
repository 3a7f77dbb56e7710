//! The live-page capability every component is handed.
//!
//! Nothing in the engine touches a browser directly. Components receive a
//! `&impl LivePage` and go through these operations only, so the same code runs
//! against eoka in production and against scripted pages in tests.

mod eoka_page;
#[cfg(test)]
pub(crate) mod fake;

pub use eoka_page::EokaPage;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Attribute the eoka implementation stamps on scanned elements.
pub const HANDLE_ATTR: &str = "data-eoka-harvest";

/// Opaque reference to a live element. Only valid for the page session that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// CSS selector addressing the stamped element.
    pub fn selector(&self) -> String {
        format!("[{}=\"{}\"]", HANDLE_ATTR, self.0)
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bounding box in viewport coordinates.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Whether the center of `other` lies inside this box.
    pub fn contains_center_of(&self, other: &BBox) -> bool {
        let (cx, cy) = other.center();
        cx >= self.x && cx <= self.x + self.width && cy >= self.y && cy <= self.y + self.height
    }
}

/// Window inner size.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// A live element considered for a role.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Candidate {
    pub handle: ElementHandle,
    /// Lowercase tag name.
    pub tag: String,
    /// Visible text, whitespace collapsed.
    #[serde(default)]
    pub text: String,
    /// Attribute bag (class, title, aria-label, role, href, data-*, ...).
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub bbox: BBox,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default = "yes")]
    pub enabled: bool,
}

fn yes() -> bool {
    true
}

impl Candidate {
    pub fn new(handle: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            handle: ElementHandle::new(handle),
            tag: tag.into().to_lowercase(),
            text: String::new(),
            attrs: BTreeMap::new(),
            bbox: BBox::default(),
            visible: true,
            enabled: true,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn with_bbox(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.bbox = BBox::new(x, y, width, height);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn class(&self) -> &str {
        self.attr("class").unwrap_or("")
    }

    /// Lowercased text plus the attributes that tend to carry a control's
    /// meaning when it has no visible label.
    pub fn combined_text(&self) -> String {
        let mut out = self.text.to_lowercase();
        for (name, value) in &self.attrs {
            let relevant = matches!(
                name.as_str(),
                "class" | "title" | "aria-label" | "onclick" | "alt"
            ) || name.starts_with("data-");
            if relevant && !value.is_empty() {
                out.push(' ');
                out.push_str(&value.to_lowercase());
            }
        }
        out
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        let class = self.class();
        if !class.is_empty() {
            let short: String = class.chars().take(30).collect();
            write!(f, " class=\"{}\"", short)?;
        }
        f.write_str(">")?;
        if !self.text.is_empty() {
            let short: String = self.text.chars().take(20).collect();
            write!(f, " \"{}\"", short)?;
        }
        write!(
            f,
            " {:.0}x{:.0} @({:.0},{:.0})",
            self.bbox.width, self.bbox.height, self.bbox.x, self.bbox.y
        )
    }
}

/// One way of activating an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Trusted click dispatched through the browser's input pipeline.
    Native,
    /// `element.click()` from page script.
    Programmatic,
    /// Simulated pointer travel to the element, then a click.
    Pointer,
    /// Synthetic double activation.
    DoubleClick,
    /// Focus the element and press Enter.
    Keyboard,
}

impl Delivery {
    pub const ALL: [Delivery; 5] = [
        Delivery::Native,
        Delivery::Programmatic,
        Delivery::Pointer,
        Delivery::DoubleClick,
        Delivery::Keyboard,
    ];
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Native => write!(f, "native click"),
            Delivery::Programmatic => write!(f, "programmatic click"),
            Delivery::Pointer => write!(f, "pointer click"),
            Delivery::DoubleClick => write!(f, "double click"),
            Delivery::Keyboard => write!(f, "focus + enter"),
        }
    }
}

/// Shape of one list item: the item selector plus prioritized selectors for its
/// time label and its text, both resolved relative to the item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ItemShape {
    pub item: String,
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub text: Vec<String>,
}

/// Raw strings pulled out of one list item. Empty when a part was not found.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ExtractedItem {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub full: String,
}

impl ExtractedItem {
    pub fn new(time: impl Into<String>, text: impl Into<String>) -> Self {
        let time = time.into();
        let text = text.into();
        let full = format!("{} {}", time, text).trim().to_string();
        Self { time, text, full }
    }
}

/// Scroll cursor of a region or of the window after a scroll step.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
pub struct ScrollPosition {
    pub top: f64,
    pub height: f64,
    pub client_height: f64,
}

/// Operations the engine needs from a browser page.
///
/// Reads reflect the page at the moment of the call. Writes issue one command
/// and return; waiting is the caller's business. The engine drives one page
/// from one task, so futures are not required to be `Send`.
#[async_trait(?Send)]
pub trait LivePage {
    /// Current window inner size.
    async fn viewport(&self) -> Result<Viewport>;

    /// Elements matching a CSS selector under `root` (whole page when `None`).
    async fn query(&self, root: Option<&ElementHandle>, selector: &str) -> Result<Vec<Candidate>>;

    /// Elements whose own text equals (`exact`) or contains `text`.
    async fn query_text(
        &self,
        root: Option<&ElementHandle>,
        text: &str,
        exact: bool,
    ) -> Result<Vec<Candidate>>;

    /// Number of visible elements whose own text contains `fragment`.
    async fn count_text(&self, fragment: &str) -> Result<usize>;

    /// Number of visible elements matching `selector` (every element when `None`).
    async fn count_visible(&self, selector: Option<&str>) -> Result<usize>;

    /// Scroll the element to the center of the viewport.
    async fn scroll_into_view(&self, handle: &ElementHandle) -> Result<()>;

    /// Activate the element using one delivery strategy.
    async fn deliver(&self, handle: &ElementHandle, delivery: Delivery) -> Result<()>;

    /// Visible items of `shape` under `root`.
    async fn extract_items(
        &self,
        root: Option<&ElementHandle>,
        shape: &ItemShape,
    ) -> Result<Vec<ExtractedItem>>;

    /// Rendered text of `root` (the page body when `None`).
    async fn container_text(&self, root: Option<&ElementHandle>) -> Result<String>;

    /// Advance a scrollable element by `fraction` of its visible height.
    async fn scroll_region(&self, handle: &ElementHandle, fraction: f64) -> Result<ScrollPosition>;

    /// Advance the window by `fraction` of the viewport height.
    async fn scroll_window(&self, fraction: f64) -> Result<ScrollPosition>;
}
