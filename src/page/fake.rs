//! Scripted `LivePage` for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    Candidate, Delivery, ElementHandle, ExtractedItem, ItemShape, LivePage, ScrollPosition,
    Viewport,
};
use crate::{Error, Result};

#[derive(Default)]
struct State {
    viewport: Viewport,
    selectors: HashMap<String, Vec<Candidate>>,
    failing_selectors: HashSet<String>,
    labels: Vec<Candidate>,

    /// Visible text fragments before and after the page is opened.
    texts: Vec<String>,
    open_texts: Vec<String>,
    visible: usize,
    open_visible: usize,
    open_selectors: HashSet<String>,
    opens_on: Option<Delivery>,
    opened: bool,
    failing_deliveries: HashSet<Delivery>,
    delivered: Vec<(ElementHandle, Delivery)>,

    item_selector: Option<String>,
    failing_shapes: HashSet<String>,
    items: Vec<ExtractedItem>,
    revealed: usize,
    reveal_per_scroll: usize,
    container_text: String,

    region_fails: bool,
    window_fails: bool,
    region_scrolls: usize,
    window_scrolls: usize,
    cancel_after_scrolls: Option<(usize, CancellationToken)>,
}

pub(crate) struct FakePage {
    state: Mutex<State>,
}

impl FakePage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn with(self, f: impl FnOnce(&mut State)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn viewport(self, width: f64, height: f64) -> Self {
        self.with(|s| s.viewport = Viewport { width, height })
    }

    /// `query(_, selector)` returns these, regardless of root.
    pub fn select(self, selector: &str, candidates: Vec<Candidate>) -> Self {
        self.with(|s| {
            s.selectors
                .entry(selector.to_string())
                .or_default()
                .extend(candidates)
        })
    }

    pub fn failing_selector(self, selector: &str) -> Self {
        self.with(|s| {
            s.failing_selectors.insert(selector.to_string());
        })
    }

    /// Candidates searchable by `query_text`, matched on their text.
    pub fn label(self, candidate: Candidate) -> Self {
        self.with(|s| s.labels.push(candidate))
    }

    pub fn text(self, fragment: &str) -> Self {
        self.with(|s| s.texts.push(fragment.to_string()))
    }

    /// Text that becomes visible once the page is opened.
    pub fn text_when_open(self, fragment: &str) -> Self {
        self.with(|s| s.open_texts.push(fragment.to_string()))
    }

    pub fn visible_elements(self, closed: usize, open: usize) -> Self {
        self.with(|s| {
            s.visible = closed;
            s.open_visible = open;
        })
    }

    /// `count_visible(Some(selector))` goes from 0 to 1 once opened.
    pub fn selector_when_open(self, selector: &str) -> Self {
        self.with(|s| {
            s.open_selectors.insert(selector.to_string());
        })
    }

    /// The page opens when any element receives this delivery.
    pub fn opens_on(self, delivery: Delivery) -> Self {
        self.with(|s| s.opens_on = Some(delivery))
    }

    pub fn failing_delivery(self, delivery: Delivery) -> Self {
        self.with(|s| {
            s.failing_deliveries.insert(delivery);
        })
    }

    /// List items served to the shape with this item selector (any shape when
    /// never set). `initial` are visible at once, `per_scroll` more per scroll.
    pub fn items(self, items: Vec<ExtractedItem>, initial: usize, per_scroll: usize) -> Self {
        self.with(|s| {
            s.revealed = initial.min(items.len());
            s.items = items;
            s.reveal_per_scroll = per_scroll;
        })
    }

    pub fn item_selector(self, selector: &str) -> Self {
        self.with(|s| s.item_selector = Some(selector.to_string()))
    }

    pub fn failing_shape(self, item: &str) -> Self {
        self.with(|s| {
            s.failing_shapes.insert(item.to_string());
        })
    }

    pub fn container_text(self, text: &str) -> Self {
        self.with(|s| s.container_text = text.to_string())
    }

    pub fn region_scroll_fails(self) -> Self {
        self.with(|s| s.region_fails = true)
    }

    pub fn window_scroll_fails(self) -> Self {
        self.with(|s| s.window_fails = true)
    }

    /// Fire `token` once this many scrolls (region or window) happened.
    pub fn cancel_after_scrolls(self, scrolls: usize, token: CancellationToken) -> Self {
        self.with(|s| s.cancel_after_scrolls = Some((scrolls, token)))
    }

    pub fn delivered(&self) -> Vec<(ElementHandle, Delivery)> {
        self.state.lock().unwrap().delivered.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().opened
    }

    pub fn region_scrolls(&self) -> usize {
        self.state.lock().unwrap().region_scrolls
    }

    pub fn window_scrolls(&self) -> usize {
        self.state.lock().unwrap().window_scrolls
    }
}

impl State {
    fn after_scroll(&mut self) -> ScrollPosition {
        self.revealed = (self.revealed + self.reveal_per_scroll).min(self.items.len());
        let scrolls = self.region_scrolls + self.window_scrolls;
        if let Some((after, ref token)) = self.cancel_after_scrolls {
            if scrolls >= after {
                token.cancel();
            }
        }
        ScrollPosition {
            top: scrolls as f64 * 400.0,
            height: 400.0 * (self.items.len().max(1) as f64),
            client_height: 400.0,
        }
    }
}

#[async_trait(?Send)]
impl LivePage for FakePage {
    async fn viewport(&self) -> Result<Viewport> {
        Ok(self.state.lock().unwrap().viewport)
    }

    async fn query(&self, _root: Option<&ElementHandle>, selector: &str) -> Result<Vec<Candidate>> {
        let s = self.state.lock().unwrap();
        if s.failing_selectors.contains(selector) {
            return Err(Error::ActionFailed(format!("query: bad selector {}", selector)));
        }
        Ok(s.selectors.get(selector).cloned().unwrap_or_default())
    }

    async fn query_text(
        &self,
        _root: Option<&ElementHandle>,
        text: &str,
        exact: bool,
    ) -> Result<Vec<Candidate>> {
        let needle = text.to_lowercase();
        let s = self.state.lock().unwrap();
        Ok(s.labels
            .iter()
            .filter(|c| {
                let own = c.text.trim().to_lowercase();
                if exact {
                    own == needle
                } else {
                    own.contains(&needle)
                }
            })
            .cloned()
            .collect())
    }

    async fn count_text(&self, fragment: &str) -> Result<usize> {
        let s = self.state.lock().unwrap();
        let mut pool: Vec<&String> = s.texts.iter().collect();
        if s.opened {
            pool.extend(s.open_texts.iter());
        }
        Ok(pool.iter().filter(|t| t.contains(fragment)).count())
    }

    async fn count_visible(&self, selector: Option<&str>) -> Result<usize> {
        let s = self.state.lock().unwrap();
        Ok(match selector {
            None if s.opened => s.open_visible,
            None => s.visible,
            Some(sel) if s.opened && s.open_selectors.contains(sel) => 1,
            Some(_) => 0,
        })
    }

    async fn scroll_into_view(&self, _handle: &ElementHandle) -> Result<()> {
        Ok(())
    }

    async fn deliver(&self, handle: &ElementHandle, delivery: Delivery) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        s.delivered.push((handle.clone(), delivery));
        if s.failing_deliveries.contains(&delivery) {
            return Err(Error::ActionFailed(format!("{} rejected", delivery)));
        }
        if s.opens_on == Some(delivery) {
            s.opened = true;
        }
        Ok(())
    }

    async fn extract_items(
        &self,
        _root: Option<&ElementHandle>,
        shape: &ItemShape,
    ) -> Result<Vec<ExtractedItem>> {
        let s = self.state.lock().unwrap();
        if s.failing_shapes.contains(&shape.item) {
            return Err(Error::ActionFailed(format!("extract_items: {}", shape.item)));
        }
        let served = match s.item_selector {
            Some(ref sel) => sel == &shape.item,
            None => true,
        };
        if !served {
            return Ok(Vec::new());
        }
        Ok(s.items[..s.revealed].to_vec())
    }

    async fn container_text(&self, _root: Option<&ElementHandle>) -> Result<String> {
        Ok(self.state.lock().unwrap().container_text.clone())
    }

    async fn scroll_region(
        &self,
        handle: &ElementHandle,
        _fraction: f64,
    ) -> Result<ScrollPosition> {
        let mut s = self.state.lock().unwrap();
        if s.region_fails {
            return Err(Error::ActionFailed(format!(
                "scroll_region: element {} is not scrollable",
                handle
            )));
        }
        s.region_scrolls += 1;
        Ok(s.after_scroll())
    }

    async fn scroll_window(&self, _fraction: f64) -> Result<ScrollPosition> {
        let mut s = self.state.lock().unwrap();
        if s.window_fails {
            return Err(Error::ActionFailed("scroll_window: blocked".into()));
        }
        s.window_scrolls += 1;
        Ok(s.after_scroll())
    }
}
