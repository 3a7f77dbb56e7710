//! Activating a chosen element and verifying the page reacted.

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{InteractionSpec, Signal, VerifySpec};
use crate::page::{Candidate, Delivery, LivePage};
use crate::retry::{isolate, settle, Stop};
use crate::{Error, Result};

/// Which verification signals held on the last sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationSignal {
    pub matched: Vec<String>,
    pub total: usize,
    pub quorum: usize,
}

impl VerificationSignal {
    pub fn satisfied(&self) -> bool {
        self.quorum > 0 && self.matched.len() >= self.quorum
    }
}

impl fmt::Display for VerificationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} signals ({}), quorum {}",
            self.matched.len(),
            self.total,
            self.matched.join(", "),
            self.quorum
        )
    }
}

/// Page state taken before the first delivery. Every signal is judged
/// against it, so what was already on screen never counts.
#[derive(Debug, Default)]
pub struct Baseline {
    texts: HashMap<String, usize>,
    selectors: HashMap<String, usize>,
    visible: Option<usize>,
}

/// Checks the independent signals of a [`VerifySpec`] against the live page.
pub struct Verifier<'a> {
    spec: &'a VerifySpec,
}

impl<'a> Verifier<'a> {
    pub fn new(spec: &'a VerifySpec) -> Self {
        Self { spec }
    }

    pub async fn baseline<P: LivePage + ?Sized>(&self, page: &P) -> Baseline {
        let mut baseline = Baseline::default();
        for signal in &self.spec.signals {
            match signal {
                Signal::TextVisible(text) => {
                    if let Some(n) = isolate("baseline", text, page.count_text(text).await) {
                        baseline.texts.insert(text.clone(), n);
                    }
                }
                Signal::VisibleElementsAbove(_) => {
                    if baseline.visible.is_none() {
                        baseline.visible =
                            isolate("baseline", "visible", page.count_visible(None).await);
                    }
                }
                Signal::SelectorCountIncreased(sel) => {
                    if let Some(n) = isolate("baseline", sel, page.count_visible(Some(sel)).await)
                    {
                        baseline.selectors.insert(sel.clone(), n);
                    }
                }
            }
        }
        baseline
    }

    /// Signals that changed since `baseline`. A signal whose baseline could
    /// not be taken never holds.
    pub async fn sample<P: LivePage + ?Sized>(
        &self,
        page: &P,
        baseline: &Baseline,
    ) -> VerificationSignal {
        let mut matched = Vec::new();
        for signal in &self.spec.signals {
            let label = signal.to_string();
            let hit = match signal {
                Signal::TextVisible(text) => match baseline.texts.get(text) {
                    Some(&before) => {
                        let count = page.count_text(text).await;
                        isolate("signal", &label, count).map(|n| n > before)
                    }
                    None => None,
                },
                Signal::VisibleElementsAbove(min) => match baseline.visible {
                    Some(before) => isolate("signal", &label, page.count_visible(None).await)
                        .map(|n| n > *min && n > before),
                    None => None,
                },
                Signal::SelectorCountIncreased(sel) => match baseline.selectors.get(sel) {
                    Some(&before) => {
                        let count = page.count_visible(Some(sel)).await;
                        isolate("signal", &label, count).map(|n| n > before)
                    }
                    None => None,
                },
            };
            if hit == Some(true) {
                matched.push(label);
            }
        }
        VerificationSignal {
            matched,
            total: self.spec.signals.len(),
            quorum: self.spec.quorum,
        }
    }
}

/// Result of [`Interactor::invoke`].
#[derive(Debug, Clone, Serialize)]
pub struct InteractionOutcome {
    pub success: bool,
    /// The strategy whose effect was verified.
    pub strategy: Option<Delivery>,
    pub elapsed_ms: u64,
    /// Verification polls across every strategy.
    pub attempts: u32,
    /// Last sample taken.
    pub signal: VerificationSignal,
}

/// Tries delivery strategies in order until one is verified.
pub struct Interactor<'a> {
    spec: &'a InteractionSpec,
}

impl<'a> Interactor<'a> {
    pub fn new(spec: &'a InteractionSpec) -> Self {
        Self { spec }
    }

    /// Bring `target` into view, then deliver each strategy in turn and poll
    /// the verifier. A strategy only runs after the previous one's polling
    /// window passed without quorum.
    ///
    /// Returns `Ok` with `success: false` when every strategy was exhausted,
    /// and `Err(Error::Cancelled)` when the token fired.
    pub async fn invoke<P: LivePage + ?Sized>(
        &self,
        page: &P,
        target: &Candidate,
        verifier: &Verifier<'_>,
        cancel: &CancellationToken,
    ) -> Result<InteractionOutcome> {
        let start = Instant::now();
        let handle = &target.handle;

        if let Err(e) = page.scroll_into_view(handle).await {
            warn!("scroll into view {} failed: {}", handle, e);
        }
        settle(self.spec.settle_ms, cancel).await?;

        let baseline = verifier.baseline(page).await;
        let mut attempts = 0;
        let mut last = VerificationSignal {
            matched: Vec::new(),
            total: verifier.spec.signals.len(),
            quorum: verifier.spec.quorum,
        };

        for &strategy in &self.spec.strategies {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            info!("{} on {} ({} window)", strategy, target, self.spec.poll);
            if let Err(e) = page.deliver(handle, strategy).await {
                warn!("{} failed: {}", strategy, e);
                continue;
            }

            let mut ticks = self.spec.poll.ticks(cancel);
            while ticks.next().await.is_some() {
                attempts += 1;
                last = verifier.sample(page, &baseline).await;
                if last.satisfied() {
                    info!("{} verified: {}", strategy, last);
                    return Ok(InteractionOutcome {
                        success: true,
                        strategy: Some(strategy),
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        attempts,
                        signal: last,
                    });
                }
            }
            if ticks.stop_reason() == Some(Stop::Cancelled) {
                return Err(Error::Cancelled);
            }
            debug!("{} not verified: {}", strategy, last);
        }

        warn!(
            "no strategy verified after {} polls (up to {}ms each): {}",
            attempts,
            self.spec.poll.budget_ms(),
            last
        );
        Ok(InteractionOutcome {
            success: false,
            strategy: None,
            elapsed_ms: start.elapsed().as_millis() as u64,
            attempts,
            signal: last,
        })
    }
}
