//! # eoka-harvest
//!
//! Heuristic browser interaction engine. Finds an unlabeled trigger control on a
//! live page, opens the panel behind it, selects a sub-view and harvests a
//! scroll-loaded list of timestamped lines into timed records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use eoka_harvest::{harvest_dynamic_content, Config, EokaPage};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> eoka_harvest::Result<()> {
//! let config = Config::load("configs/bilibili-ai-subtitles.yaml")?;
//! let browser = eoka::Browser::launch().await?;
//! let page = browser.new_page(&config.target.url).await?;
//!
//! let live = EokaPage::new(&page);
//! let result = harvest_dynamic_content(&live, &config.profile, &CancellationToken::new()).await?;
//! for record in &result.records {
//!     println!("{:>8.1}  {}", record.start, record.content);
//! }
//! # Ok(())
//! # }
//! ```

mod config;
pub mod engine;
pub mod harvest;
pub mod interact;
pub mod normalize;
pub mod page;
pub mod retry;
mod runner;
pub mod scan;
pub mod score;
pub mod view;

pub use config::{
    BrowserConfig, Config, HarvestSpec, InteractionSpec, NormalizeSpec, OnFailure, ParamDef,
    Params, Predicate, Profile, RetryConfig, RoleSpec, Rule, Signal, SizeRange, TargetUrl,
    VerifySpec, ViewLabel, ViewSpec, WindowSize,
};
pub use engine::{harvest_dynamic_content, HarvestResult};
pub use harvest::{HarvestReport, HarvestStatus, Harvester, RawRecord, ScrollTarget};
pub use interact::{InteractionOutcome, Interactor, VerificationSignal, Verifier};
pub use normalize::{normalize, TimedRecord};
pub use page::{
    BBox, Candidate, Delivery, EokaPage, ElementHandle, ExtractedItem, ItemShape, LivePage,
    ScrollPosition, Viewport,
};
pub use retry::{Poll, Stop, Ticker};
pub use runner::{RunResult, Runner};
pub use score::{ScoredCandidate, Scorer, Tier};
pub use view::{ViewActivation, ViewActivator};

/// Result type for eoka-harvest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine, its config layer and the runner.
///
/// Partial harvests are not errors: they come back as
/// [`HarvestStatus::Incomplete`] or [`HarvestStatus::ScrollExhausted`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    /// No acceptable candidate across every pattern. Callers may fall back to
    /// another extraction path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Every delivery strategy ran its polling window without a verified effect.
    #[error("interaction not verified after {strategies} strategies: {signal}")]
    InteractionTimeout {
        strategies: usize,
        signal: VerificationSignal,
    },

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interaction_timeout_message_carries_signal() {
        let err = Error::InteractionTimeout {
            strategies: 5,
            signal: VerificationSignal {
                matched: vec!["视频总结".into()],
                total: 4,
                quorum: 2,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("5 strategies"), "{}", msg);
        assert!(msg.contains("1/4"), "{}", msg);
        assert!(msg.contains("视频总结"), "{}", msg);
    }

    #[test]
    fn test_not_found_is_distinct_from_timeout() {
        let err = Error::NotFound("trigger".into());
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), "not found: trigger");
    }
}
