//! Rule-table scoring of candidates for a role.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::{Predicate, RoleSpec};
use crate::page::{Candidate, ElementHandle, LivePage, Viewport};
use crate::scan;
use crate::{Error, Result};

/// Confidence band of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Confident,
    Tentative,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// In [0, 1].
    pub score: f64,
    /// Ids of the rules that fired. An exclusion leaves only its own id.
    pub matched: Vec<String>,
    pub tier: Tier,
}

impl ScoredCandidate {
    pub fn is_acceptable(&self) -> bool {
        self.tier != Tier::Rejected
    }
}

impl fmt::Display for ScoredCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} {:?} {} [{}]",
            self.score,
            self.tier,
            self.candidate,
            self.matched.join(", ")
        )
    }
}

fn any_in(haystack: &str, needles: &[String]) -> bool {
    needles
        .iter()
        .any(|n| haystack.contains(n.to_lowercase().as_str()))
}

impl Predicate {
    /// Whether the candidate satisfies this predicate. Pure.
    pub fn matches(&self, c: &Candidate, viewport: &Viewport) -> bool {
        match self {
            Predicate::TextContains(any) => any_in(&c.text.to_lowercase(), any),
            Predicate::TextEquals(any) => {
                let text = c.text.trim().to_lowercase();
                any.iter().any(|t| t.to_lowercase() == text)
            }
            Predicate::CombinedContains(any) => any_in(&c.combined_text(), any),
            Predicate::ClassContains(any) => any_in(&c.class().to_lowercase(), any),
            Predicate::AttrContains { name, any } => match c.attr(name) {
                Some(value) => any.is_empty() || any_in(&value.to_lowercase(), any),
                None => false,
            },
            Predicate::TagIn(tags) => tags.iter().any(|t| t.eq_ignore_ascii_case(&c.tag)),
            Predicate::RoleIn(roles) => c
                .attr("role")
                .map(|r| roles.iter().any(|x| x.eq_ignore_ascii_case(r)))
                .unwrap_or(false),
            Predicate::TextLongerThan(n) => c.text.trim().chars().count() > *n,
            Predicate::TextEmpty => c.text.trim().is_empty(),
            Predicate::SizeWithin(r) => {
                let (w, h) = (c.bbox.width, c.bbox.height);
                w >= r.min_width && w <= r.max_width && h >= r.min_height && h <= r.max_height
            }
            Predicate::RightOf(f) => c.bbox.x > viewport.width * f,
            Predicate::LeftOf(f) => c.bbox.x < viewport.width * f,
            Predicate::Below(f) => c.bbox.y > viewport.height * f,
            Predicate::All(items) => items.iter().all(|p| p.matches(c, viewport)),
            Predicate::Any(items) => items.iter().any(|p| p.matches(c, viewport)),
            Predicate::Not(inner) => !inner.matches(c, viewport),
        }
    }
}

/// Scores candidates against one role's rule table.
pub struct Scorer<'a> {
    spec: &'a RoleSpec,
}

impl<'a> Scorer<'a> {
    pub fn new(spec: &'a RoleSpec) -> Self {
        Self { spec }
    }

    pub fn tier(&self, score: f64) -> Tier {
        if score >= self.spec.confident {
            Tier::Confident
        } else if score >= self.spec.acceptable {
            Tier::Tentative
        } else {
            Tier::Rejected
        }
    }

    /// Exclusions first; then the best weight of every signal category,
    /// summed and clamped to [0, 1].
    pub fn score(&self, candidate: &Candidate, viewport: &Viewport) -> ScoredCandidate {
        let rules = &self.spec.rules;

        if let Some(rule) = rules
            .iter()
            .find(|r| r.exclude && r.when.matches(candidate, viewport))
        {
            return ScoredCandidate {
                candidate: candidate.clone(),
                score: 0.0,
                matched: vec![rule.id.clone()],
                tier: Tier::Rejected,
            };
        }

        let mut best: BTreeMap<&str, f64> = BTreeMap::new();
        let mut matched = Vec::new();
        for rule in rules.iter().filter(|r| !r.exclude) {
            if !rule.when.matches(candidate, viewport) {
                continue;
            }
            matched.push(rule.id.clone());
            let slot = best.entry(rule.signal()).or_insert(0.0);
            if rule.weight > *slot {
                *slot = rule.weight;
            }
        }

        let score = best.values().sum::<f64>().clamp(0.0, 1.0);
        ScoredCandidate {
            candidate: candidate.clone(),
            score,
            matched,
            tier: self.tier(score),
        }
    }

    /// Every candidate scored, highest first. Equal scores keep scan order.
    pub fn rank(&self, pool: &[Candidate], viewport: &Viewport) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> =
            pool.iter().map(|c| self.score(c, viewport)).collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored
    }

    /// Highest scoring acceptable candidate, the earliest on ties.
    pub fn best(&self, pool: &[Candidate], viewport: &Viewport) -> Option<ScoredCandidate> {
        self.rank(pool, viewport)
            .into_iter()
            .next()
            .filter(ScoredCandidate::is_acceptable)
    }
}

/// Scan `role.patterns` under `root` and pick the best candidate.
pub async fn locate<P: LivePage + ?Sized>(
    page: &P,
    root: Option<&ElementHandle>,
    role: &RoleSpec,
    name: &str,
) -> Result<ScoredCandidate> {
    let viewport = page.viewport().await?;
    let pool = scan::scan(page, root, &role.patterns, role.max_candidates)
        .await
        .map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(format!("{}: no candidates", name)),
            other => other,
        })?;

    let scorer = Scorer::new(role);
    let ranked = scorer.rank(&pool, &viewport);
    for s in ranked.iter().take(5) {
        debug!("{} candidate {}", name, s);
    }

    match ranked.into_iter().next().filter(ScoredCandidate::is_acceptable) {
        Some(best) => {
            info!("{}: {}", name, best);
            Ok(best)
        }
        None => Err(Error::NotFound(format!(
            "{}: {} candidates, none scored {:.2} or more",
            name,
            pool.len(),
            role.acceptable
        ))),
    }
}
