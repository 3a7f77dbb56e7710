//! Incremental harvesting of a scroll-revealed list.
//!
//! Each iteration samples the items currently rendered, keeps the ones not
//! seen before, then scrolls the region a fraction of its height and lets the
//! page settle. The loop converges after `stagnation_limit` iterations in a
//! row add nothing, and never runs more than `poll.max_attempts` iterations.

use std::collections::HashSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HarvestSpec;
use crate::normalize::split_leading_timestamp;
use crate::page::{ElementHandle, ExtractedItem, LivePage, ScrollPosition};
use crate::retry::{isolate, Stop};

/// One harvested line before normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawRecord {
    pub time_label: Option<String>,
    pub text: String,
}

impl RawRecord {
    pub fn new(time_label: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            time_label: time_label.map(String::from),
            text: text.into(),
        }
    }

    /// Identity used to drop re-rendered items. Label and text when there is a
    /// label, text alone otherwise.
    pub fn dedup_key(&self) -> (Option<&str>, &str) {
        (self.time_label.as_deref(), self.text.as_str())
    }
}

/// Where scroll advances go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollTarget {
    Region(ElementHandle),
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    /// No new records for the configured number of iterations.
    Converged,
    /// Iteration cap reached while records were still arriving.
    Incomplete,
    /// Neither the region nor the window could be scrolled.
    ScrollExhausted,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub records: Vec<RawRecord>,
    pub iterations: u32,
    pub status: HarvestStatus,
    /// The region could not be scrolled and the window was used instead.
    pub scroll_fallback: bool,
}

struct HarvestSession {
    seen: HashSet<(Option<String>, String)>,
    records: Vec<RawRecord>,
    stagnation: u32,
    scroll: ScrollPosition,
    target: ScrollTarget,
    fallback: bool,
}

impl HarvestSession {
    fn new(target: ScrollTarget) -> Self {
        Self {
            seen: HashSet::new(),
            records: Vec::new(),
            stagnation: 0,
            scroll: ScrollPosition::default(),
            target,
            fallback: false,
        }
    }

    /// Append novel records; returns how many were new.
    fn absorb(&mut self, batch: Vec<RawRecord>) -> usize {
        let before = self.records.len();
        for record in batch {
            let (label, text) = record.dedup_key();
            let key = (label.map(String::from), text.to_string());
            if self.seen.insert(key) {
                self.records.push(record);
            }
        }
        self.records.len() - before
    }

    /// Scroll one step. `false` when nothing could be scrolled.
    async fn advance<P: LivePage + ?Sized>(&mut self, page: &P, fraction: f64) -> bool {
        if let ScrollTarget::Region(ref handle) = self.target {
            match page.scroll_region(handle, fraction).await {
                Ok(pos) => {
                    self.scroll = pos;
                    return true;
                }
                Err(e) => {
                    warn!(
                        "ScrollUnavailable: region {} ({}), falling back to the window",
                        handle, e
                    );
                    self.target = ScrollTarget::Window;
                    self.fallback = true;
                }
            }
        }
        match page.scroll_window(fraction).await {
            Ok(pos) => {
                self.scroll = pos;
                true
            }
            Err(e) => {
                warn!("window scroll failed: {}", e);
                false
            }
        }
    }
}

pub struct Harvester<'a> {
    spec: &'a HarvestSpec,
}

impl<'a> Harvester<'a> {
    pub fn new(spec: &'a HarvestSpec) -> Self {
        Self { spec }
    }

    /// Run the loop until convergence, the iteration cap, a scroll dead end
    /// or cancellation. Always returns what was collected.
    pub async fn harvest<P: LivePage + ?Sized>(
        &self,
        page: &P,
        list: Option<&ElementHandle>,
        scroll: ScrollTarget,
        cancel: &CancellationToken,
    ) -> HarvestReport {
        let mut session = HarvestSession::new(scroll);
        let mut ticks = self.spec.poll.ticks_now(cancel);

        let status = loop {
            let Some(iteration) = ticks.next().await else {
                break match ticks.stop_reason() {
                    Some(Stop::Cancelled) => HarvestStatus::Cancelled,
                    _ => HarvestStatus::Incomplete,
                };
            };

            let added = session.absorb(self.sample(page, list).await);
            if added == 0 {
                session.stagnation += 1;
            } else {
                session.stagnation = 0;
            }
            debug!(
                "iteration {}: +{} (total {}, stagnant {}, scroll {:.0}/{:.0})",
                iteration,
                added,
                session.records.len(),
                session.stagnation,
                session.scroll.top,
                session.scroll.height
            );

            if session.stagnation >= self.spec.stagnation_limit {
                break HarvestStatus::Converged;
            }
            if !session.advance(page, self.spec.scroll_fraction).await {
                break HarvestStatus::ScrollExhausted;
            }
        };

        let iterations = ticks.attempts();
        match status {
            HarvestStatus::Converged => info!(
                "harvest converged: {} records in {} iterations",
                session.records.len(),
                iterations
            ),
            other => warn!(
                "harvest stopped ({:?}): {} records in {} iterations",
                other,
                session.records.len(),
                iterations
            ),
        }

        HarvestReport {
            records: session.records,
            iterations,
            status,
            scroll_fallback: session.fallback,
        }
    }

    /// Records currently rendered under `list`.
    pub async fn sample<P: LivePage + ?Sized>(
        &self,
        page: &P,
        list: Option<&ElementHandle>,
    ) -> Vec<RawRecord> {
        for shape in &self.spec.items {
            let extracted = page.extract_items(list, shape).await;
            let Some(items) = isolate("item shape", &shape.item, extracted) else {
                continue;
            };
            if items.is_empty() {
                continue;
            }
            return items.iter().filter_map(|i| self.to_record(i)).collect();
        }

        if !self.spec.text_fallback {
            return Vec::new();
        }
        match isolate("container text", "list", page.container_text(list).await) {
            Some(text) => self.parse_lines(&text),
            None => Vec::new(),
        }
    }

    fn is_noise(&self, s: &str) -> bool {
        self.spec.noise.iter().any(|n| s.contains(n.as_str()))
    }

    fn accept(&self, time_label: Option<&str>, content: &str) -> Option<RawRecord> {
        let content = content.trim();
        if content.chars().count() < self.spec.min_text_chars || self.is_noise(content) {
            return None;
        }
        Some(RawRecord::new(time_label, content))
    }

    fn to_record(&self, item: &ExtractedItem) -> Option<RawRecord> {
        let full = item.full.trim();
        if self.is_noise(full) {
            return None;
        }
        let time = item.time.trim();
        let text = item.text.trim();

        if !time.is_empty() {
            let content = if !text.is_empty() && text != time {
                text.to_string()
            } else {
                full.replacen(time, "", 1)
            };
            return self.accept(Some(time), &content);
        }

        match split_leading_timestamp(full) {
            Some((label, rest)) => {
                let content = if text.is_empty() || text == label {
                    rest
                } else {
                    text
                };
                self.accept(Some(label), content)
            }
            None => self.accept(None, if text.is_empty() { full } else { text }),
        }
    }

    /// `mm:ss text` lines, or a bare timestamp line followed by its text.
    fn parse_lines(&self, text: &str) -> Vec<RawRecord> {
        let mut out = Vec::new();
        let mut pending: Option<&str> = None;
        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match split_leading_timestamp(line) {
                Some((label, rest)) if rest.is_empty() => pending = Some(label),
                Some((label, rest)) => {
                    pending = None;
                    out.extend(self.accept(Some(label), rest));
                }
                None => {
                    if let Some(label) = pending.take() {
                        out.extend(self.accept(Some(label), line));
                    }
                }
            }
        }
        out
    }
}
