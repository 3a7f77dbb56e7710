//! Candidate scanning over prioritized selector patterns.

use std::collections::HashSet;

use tracing::debug;

use crate::page::{Candidate, ElementHandle, LivePage};
use crate::retry::isolate;
use crate::{Error, Result};

/// Collect visible, enabled candidates for `patterns` under `root`, in
/// pattern order, without duplicates, stopping at `cap`.
///
/// A pattern that fails is logged and skipped. `Error::NotFound` only when no
/// pattern produced anything.
pub async fn scan<P: LivePage + ?Sized>(
    page: &P,
    root: Option<&ElementHandle>,
    patterns: &[String],
    cap: usize,
) -> Result<Vec<Candidate>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    'patterns: for pattern in patterns {
        let Some(found) = isolate("pattern", pattern, page.query(root, pattern).await) else {
            continue;
        };
        let before = out.len();
        for c in found {
            if !c.visible || !c.enabled {
                continue;
            }
            if seen.insert(c.handle.clone()) {
                out.push(c);
                if out.len() >= cap {
                    debug!("pattern '{}': cap of {} reached", pattern, cap);
                    break 'patterns;
                }
            }
        }
        if out.len() > before {
            debug!("pattern '{}': {} new candidates", pattern, out.len() - before);
        }
    }

    if out.is_empty() {
        return Err(Error::NotFound(format!(
            "no visible candidates for {} patterns",
            patterns.len()
        )));
    }
    Ok(out)
}

/// First visible element for the earliest pattern that has one.
pub async fn first<P: LivePage + ?Sized>(
    page: &P,
    root: Option<&ElementHandle>,
    patterns: &[String],
) -> Option<Candidate> {
    for pattern in patterns {
        let Some(found) = isolate("pattern", pattern, page.query(root, pattern).await) else {
            continue;
        };
        if let Some(c) = found.into_iter().find(|c| c.visible) {
            debug!("pattern '{}' -> {}", pattern, c);
            return Some(c);
        }
    }
    None
}
