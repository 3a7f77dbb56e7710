use crate::config::{BrowserConfig, Config};
use crate::engine::harvest_dynamic_content;
use crate::harvest::HarvestStatus;
use crate::normalize::TimedRecord;
use crate::page::EokaPage;
use crate::{Error, Result};
use eoka::{Browser, Page};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of running a config.
#[derive(Debug)]
pub struct RunResult {
    /// Whether at least one record was harvested.
    pub success: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Timed records from the last attempt.
    pub records: Vec<TimedRecord>,
    /// How the last harvest loop ended, if it got that far.
    pub status: Option<HarvestStatus>,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// Number of retry attempts made.
    pub retries: u32,
}

/// Owns a browser and runs harvest configs against it.
pub struct Runner {
    browser: Browser,
    page: Page,
}

impl Runner {
    /// Launch a browser for `config`.
    pub async fn new(config: &BrowserConfig) -> Result<Self> {
        let stealth = eoka::StealthConfig {
            headless: config.headless,
            proxy: config.proxy.clone(),
            user_agent: config.user_agent.clone(),
            viewport_width: config.viewport.as_ref().map(|v| v.width).unwrap_or(1920),
            viewport_height: config.viewport.as_ref().map(|v| v.height).unwrap_or(1080),
            ..Default::default()
        };

        debug!(
            "Launching browser (headless: {}, proxy: {:?})",
            config.headless, config.proxy
        );
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;

        Ok(Self { browser, page })
    }

    /// Run the config, retrying per `on_failure.retry`.
    ///
    /// Cancellation ends the run without further retries.
    pub async fn run(&mut self, config: &Config, cancel: &CancellationToken) -> Result<RunResult> {
        let start = Instant::now();
        let retry_config = config.on_failure.as_ref().and_then(|f| f.retry.as_ref());
        let max_attempts = retry_config.map(|r| r.attempts).unwrap_or(1);
        let retry_delay = retry_config.map(|r| r.delay_ms).unwrap_or(0);

        let mut last_error = None;
        let mut last_records = Vec::new();
        let mut last_status = None;
        let mut retries = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                retries += 1;
                info!("Retry attempt {}/{}", attempt, max_attempts);
                if retry_delay > 0 {
                    crate::retry::settle(retry_delay, cancel).await?;
                }
            }

            match self.run_once(config, cancel).await {
                Ok((records, status)) if !records.is_empty() => {
                    return Ok(RunResult {
                        success: true,
                        error: None,
                        records,
                        status: Some(status),
                        duration_ms: start.elapsed().as_millis() as u64,
                        retries,
                    });
                }
                Ok((records, status)) => {
                    last_records = records;
                    last_status = Some(status);
                    last_error = Some(format!("no records harvested ({:?})", status));
                    if status == HarvestStatus::Cancelled {
                        break;
                    }
                    if attempt == max_attempts {
                        self.handle_failure(config).await;
                    }
                }
                Err(Error::Cancelled) => {
                    last_error = Some(Error::Cancelled.to_string());
                    break;
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", attempt, e);
                    last_error = Some(e.to_string());
                    if attempt == max_attempts {
                        self.handle_failure(config).await;
                    }
                }
            }
        }

        Ok(RunResult {
            success: false,
            error: last_error,
            records: last_records,
            status: last_status,
            duration_ms: start.elapsed().as_millis() as u64,
            retries,
        })
    }

    async fn handle_failure(&self, config: &Config) {
        let Some(ref on_failure) = config.on_failure else {
            return;
        };
        if let Some(ref screenshot_path) = on_failure.screenshot {
            let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
            let path = screenshot_path.replace("{timestamp}", &timestamp);
            info!("Saving failure screenshot to: {}", path);
            match self.page.screenshot().await {
                Ok(data) => {
                    if let Err(e) = std::fs::write(&path, data) {
                        warn!("Failed to save screenshot: {}", e);
                    }
                }
                Err(e) => warn!("Failed to take screenshot: {}", e),
            }
        }
    }

    async fn run_once(
        &mut self,
        config: &Config,
        cancel: &CancellationToken,
    ) -> Result<(Vec<TimedRecord>, HarvestStatus)> {
        info!("Navigating to: {}", config.target.url);
        self.page.goto(&config.target.url).await?;
        crate::retry::settle(config.target.settle_ms, cancel).await?;

        let live = EokaPage::new(&self.page);
        let result = harvest_dynamic_content(&live, &config.profile, cancel).await?;
        Ok((result.records, result.status))
    }

    /// Close the browser.
    pub async fn close(self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}
