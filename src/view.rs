//! Selecting a labeled sub-view (tab) inside an opened panel.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ViewSpec;
use crate::page::{Candidate, Delivery, LivePage, Viewport};
use crate::retry::settle;
use crate::{Error, Result};

/// What [`ViewActivator::ensure`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewActivation {
    AlreadyActive,
    Activated(Delivery),
}

pub struct ViewActivator<'a> {
    spec: &'a ViewSpec,
}

impl<'a> ViewActivator<'a> {
    pub fn new(spec: &'a ViewSpec) -> Self {
        Self { spec }
    }

    fn in_region(&self, c: &Candidate, panel: Option<&Candidate>, viewport: &Viewport) -> bool {
        match panel {
            Some(p) => p.bbox.contains_center_of(&c.bbox),
            None => c.bbox.x > viewport.width * self.spec.min_x_fraction,
        }
    }

    fn has_marker(&self, c: &Candidate, markers: &[String]) -> bool {
        let tokens: Vec<Vec<String>> = c.class().split_whitespace().map(class_words).collect();
        markers.iter().any(|m| {
            let marker = class_words(m);
            !marker.is_empty()
                && tokens
                    .iter()
                    .any(|words| words.windows(marker.len()).any(|w| w == marker.as_slice()))
        })
    }

    pub fn is_active(&self, c: &Candidate) -> bool {
        c.attr("aria-selected") == Some("true") || self.has_marker(c, &self.spec.active_markers)
    }

    /// The element carrying the first label that has an eligible match.
    pub async fn find<P: LivePage + ?Sized>(
        &self,
        page: &P,
        panel: Option<&Candidate>,
    ) -> Result<Candidate> {
        let viewport = page.viewport().await?;
        let root = panel.map(|p| &p.handle);

        for label in &self.spec.labels {
            let found = match page.query_text(root, &label.text, label.exact).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("view label '{}' failed: {}", label.text, e);
                    continue;
                }
            };
            let mut eligible: Vec<Candidate> = found
                .into_iter()
                .filter(|c| c.visible && c.enabled && self.in_region(c, panel, &viewport))
                .collect();
            if eligible.is_empty() {
                continue;
            }
            // Stable: tab-like matches first, page order otherwise.
            eligible.sort_by_key(|c| !self.has_marker(c, &self.spec.tab_markers));
            let chosen = eligible.swap_remove(0);
            debug!(
                "view label '{}' (exact: {}) -> {}",
                label.text, label.exact, chosen
            );
            return Ok(chosen);
        }

        Err(Error::NotFound(format!(
            "view: no element labeled {}",
            self.spec
                .labels
                .iter()
                .map(|l| format!("'{}'", l.text))
                .collect::<Vec<_>>()
                .join(" / ")
        )))
    }

    /// Make the labeled view active. A no-op when it already is.
    pub async fn ensure<P: LivePage + ?Sized>(
        &self,
        page: &P,
        panel: Option<&Candidate>,
        cancel: &CancellationToken,
    ) -> Result<ViewActivation> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let tab = self.find(page, panel).await?;
        if self.is_active(&tab) {
            info!("view {} already active", tab);
            return Ok(ViewActivation::AlreadyActive);
        }

        for &strategy in &self.spec.strategies {
            match page.deliver(&tab.handle, strategy).await {
                Ok(()) => {
                    info!("view {} activated by {}", tab, strategy);
                    settle(self.spec.settle_ms, cancel).await?;
                    return Ok(ViewActivation::Activated(strategy));
                }
                Err(e) => warn!("view {} via {} failed: {}", tab, strategy, e),
            }
        }

        Err(Error::ActionFailed(format!(
            "view {}: all {} strategies failed",
            tab,
            self.spec.strategies.len()
        )))
    }
}

/// Lowercase words of one class token, split on `-`, `_` and camelCase
/// boundaries. `_Tab_x1` gives `[tab, x1]`, `tab-inactive` gives
/// `[tab, inactive]`.
fn class_words(token: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut prev_lower = false;
    for ch in token.chars() {
        if ch == '-' || ch == '_' {
            if !word.is_empty() {
                words.push(std::mem::take(&mut word));
            }
            prev_lower = false;
            continue;
        }
        if ch.is_uppercase() && prev_lower && !word.is_empty() {
            words.push(std::mem::take(&mut word));
        }
        prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        word.extend(ch.to_lowercase());
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}
