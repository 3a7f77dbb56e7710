//! The end-to-end pipeline: trigger, panel, view, harvest, normalize.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Profile;
use crate::harvest::{HarvestStatus, Harvester, ScrollTarget};
use crate::interact::{InteractionOutcome, Interactor, Verifier};
use crate::normalize::{normalize, TimedRecord};
use crate::page::{Candidate, LivePage};
use crate::scan;
use crate::score::{self, ScoredCandidate};
use crate::view::{ViewActivation, ViewActivator};
use crate::{Error, Result};

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub records: Vec<TimedRecord>,
    pub status: HarvestStatus,
    pub iterations: u32,
    pub trigger: ScoredCandidate,
    pub interaction: InteractionOutcome,
    pub view: ViewActivation,
    pub scroll_fallback: bool,
}

/// Open the content behind the profile's trigger, select its view and
/// harvest the list into timed records.
///
/// A harvest that stopped early (iteration cap, no scrollable region,
/// cancellation while scrolling) is still `Ok`; see [`HarvestResult::status`].
pub async fn harvest_dynamic_content<P: LivePage + ?Sized>(
    page: &P,
    profile: &Profile,
    cancel: &CancellationToken,
) -> Result<HarvestResult> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let trigger = score::locate(page, None, &profile.trigger, "trigger").await?;

    let verifier = Verifier::new(&profile.verify);
    let interaction = Interactor::new(&profile.interaction)
        .invoke(page, &trigger.candidate, &verifier, cancel)
        .await?;
    if !interaction.success {
        return Err(Error::InteractionTimeout {
            strategies: profile.interaction.strategies.len(),
            signal: interaction.signal,
        });
    }

    let panel = locate_panel(page, profile).await?;
    let view = ViewActivator::new(&profile.view)
        .ensure(page, panel.as_ref(), cancel)
        .await?;

    let root = panel.as_ref().map(|p| &p.handle);
    let list = scan::first(page, root, &profile.harvest.list).await;
    let region = scan::first(page, root, &profile.harvest.scroll)
        .await
        .or_else(|| list.clone())
        .or_else(|| panel.clone());
    let scroll = match region {
        Some(c) => {
            info!("scroll region {}", c);
            ScrollTarget::Region(c.handle)
        }
        None => {
            warn!("no scroll region, using the window");
            ScrollTarget::Window
        }
    };
    let list_root = list.as_ref().map(|c| &c.handle).or(root);

    let report = Harvester::new(&profile.harvest)
        .harvest(page, list_root, scroll, cancel)
        .await;
    let records = normalize(&report.records, profile.normalize.duration_secs);
    info!(
        "{} timed records ({:?}, {} iterations)",
        records.len(),
        report.status,
        report.iterations
    );

    Ok(HarvestResult {
        records,
        status: report.status,
        iterations: report.iterations,
        trigger,
        interaction,
        view,
        scroll_fallback: report.scroll_fallback,
    })
}

async fn locate_panel<P: LivePage + ?Sized>(
    page: &P,
    profile: &Profile,
) -> Result<Option<Candidate>> {
    let Some(ref role) = profile.panel else {
        return Ok(None);
    };
    match score::locate(page, None, role, "panel").await {
        Ok(found) => Ok(Some(found.candidate)),
        Err(Error::NotFound(msg)) => {
            warn!("{}; searching the whole page", msg);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
