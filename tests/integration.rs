//! Integration tests for eoka-harvest
//!
//! The `#[ignore]`d tests require Chrome to be installed and available.
//! Run with: cargo test --test integration -- --ignored

use std::cell::{Cell, RefCell};

use async_trait::async_trait;
use eoka_harvest::{
    harvest_dynamic_content, Candidate, Config, Delivery, ElementHandle, EokaPage, Error,
    ExtractedItem, HarvestStatus, ItemShape, LivePage, Params, Profile, Scorer, ScrollPosition,
    Tier, Viewport,
};
use tokio_util::sync::CancellationToken;

/// Check if Chrome is available
fn chrome_available() -> bool {
    eoka::stealth::patcher::find_chrome().is_ok()
}

fn config_path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("configs")
        .join(name)
}

#[test]
fn test_shipped_config_loads_with_builtin_profile() {
    let params = Params::new().set("bvid", "BV1xx411c7mD");
    let config = Config::load_with_params(config_path("bilibili-ai-subtitles.yaml"), &params)
        .expect("config should load");

    assert_eq!(
        config.target.url,
        "https://www.bilibili.com/video/BV1xx411c7mD?p=1"
    );
    assert!(!config.profile.trigger.patterns.is_empty());
    assert!(config.profile.panel.is_some());
    assert_eq!(config.profile.verify.quorum, 2);
    assert_eq!(config.profile.view.labels[0].text, "字幕列表");
    assert_eq!(config.profile.normalize.duration_secs, 3.0);
    assert_eq!(
        config.on_failure.and_then(|f| f.retry).map(|r| r.attempts),
        Some(2)
    );
}

#[test]
fn test_shipped_config_requires_video_id() {
    let err = Config::load(config_path("bilibili-ai-subtitles.yaml")).unwrap_err();
    assert!(err.to_string().contains("bvid"), "{}", err);
}

#[test]
fn test_builtin_profile_ranks_assistant_icon_over_page_buttons() {
    let profile = Profile::builtin().expect("builtin profile is valid");
    let scorer = Scorer::new(&profile.trigger);
    let vp = Viewport::default();

    let icon = Candidate::new("1", "div")
        .with_attr("class", "video-ai-assistant video-toolbar-item")
        .with_attr("title", "AI小助手")
        .with_bbox(1560.0, 620.0, 36.0, 36.0);
    let like = Candidate::new("2", "div")
        .with_text("点赞 1.2万")
        .with_attr("class", "video-like video-toolbar-left-item")
        .with_bbox(900.0, 620.0, 80.0, 28.0);
    let plain = Candidate::new("3", "button")
        .with_attr("class", "bpx-player-ctrl-btn")
        .with_bbox(1700.0, 900.0, 36.0, 36.0);
    let episode = Candidate::new("4", "a")
        .with_text("第3集 AI总结实战")
        .with_attr("href", "/video/BV1ab411c7mD?p=3");

    let icon = scorer.score(&icon, &vp);
    assert_eq!(icon.tier, Tier::Confident, "{}", icon);
    assert_eq!(scorer.score(&like, &vp).score, 0.0);
    assert_eq!(scorer.score(&episode, &vp).score, 0.0);

    let plain = scorer.score(&plain, &vp);
    assert!(plain.score < icon.score, "{} vs {}", plain, icon);
    assert_ne!(plain.tier, Tier::Confident, "{}", plain);
}

#[test]
fn test_profile_validation_errors() {
    let base = std::fs::read_to_string(config_path("profiles/bilibili.yaml")).unwrap();

    let bad_quorum = base.replace("quorum: 2", "quorum: 9");
    assert!(matches!(Profile::parse(&bad_quorum), Err(Error::Config(_))));

    let bad_fraction = base.replace("scroll_fraction: 0.8", "scroll_fraction: 1.5");
    assert!(matches!(Profile::parse(&bad_fraction), Err(Error::Config(_))));

    let bad_weight = base.replace("weight: 0.6", "weight: -0.6");
    assert!(matches!(Profile::parse(&bad_weight), Err(Error::Config(_))));
}

/// A page whose assistant panel opens on a programmatic click and whose
/// subtitle list renders eight more lines per scroll.
struct ScriptedPage {
    lines: Vec<ExtractedItem>,
    open: Cell<bool>,
    rendered: Cell<usize>,
    clicks: RefCell<Vec<Delivery>>,
}

impl ScriptedPage {
    fn new(total: usize) -> Self {
        Self {
            lines: (0..total)
                .map(|i| {
                    let time = format!("{:02}:{:02}", i / 20, (i * 3) % 60);
                    ExtractedItem::new(time, format!("第{}句字幕", i))
                })
                .collect(),
            open: Cell::new(false),
            rendered: Cell::new(0),
            clicks: RefCell::new(Vec::new()),
        }
    }
}

#[async_trait(?Send)]
impl LivePage for ScriptedPage {
    async fn viewport(&self) -> eoka_harvest::Result<Viewport> {
        Ok(Viewport::default())
    }

    async fn query(
        &self,
        _root: Option<&ElementHandle>,
        selector: &str,
    ) -> eoka_harvest::Result<Vec<Candidate>> {
        let found = match selector {
            "[class*='ai-']" => vec![Candidate::new("ai", "div")
                .with_attr("class", "video-ai-assistant")
                .with_attr("title", "AI小助手")
                .with_bbox(1560.0, 620.0, 36.0, 36.0)],
            "button" => vec![Candidate::new("share", "button")
                .with_text("分享")
                .with_bbox(1000.0, 620.0, 60.0, 28.0)],
            "[data-video-assistant-subject-wrapper]" if self.open.get() => {
                vec![Candidate::new("panel", "div")
                    .with_attr("data-video-assistant-subject-wrapper", "")
                    .with_text("AI小助手 视频总结 字幕列表 ".repeat(10))
                    .with_bbox(1420.0, 80.0, 480.0, 900.0)]
            }
            "[data-video-assistant-subject-content]" if self.open.get() => {
                vec![Candidate::new("content", "div").with_bbox(1420.0, 200.0, 480.0, 700.0)]
            }
            _ => vec![],
        };
        Ok(found)
    }

    async fn query_text(
        &self,
        _root: Option<&ElementHandle>,
        text: &str,
        exact: bool,
    ) -> eoka_harvest::Result<Vec<Candidate>> {
        let label = "字幕列表";
        let hit = if exact { text == label } else { label.contains(text) };
        Ok(if self.open.get() && hit {
            vec![Candidate::new("tab", "div")
                .with_text(label)
                .with_attr("class", "_Tab_x")
                .with_bbox(1600.0, 120.0, 64.0, 24.0)]
        } else {
            vec![]
        })
    }

    async fn count_text(&self, fragment: &str) -> eoka_harvest::Result<usize> {
        let visible = self.open.get() && ["视频总结", "字幕列表", "AI小助手"].contains(&fragment);
        Ok(visible as usize)
    }

    async fn count_visible(&self, selector: Option<&str>) -> eoka_harvest::Result<usize> {
        Ok(match (selector, self.open.get()) {
            (None, true) => 900,
            (None, false) => 400,
            (Some(_), open) => open as usize,
        })
    }

    async fn scroll_into_view(&self, _handle: &ElementHandle) -> eoka_harvest::Result<()> {
        Ok(())
    }

    async fn deliver(
        &self,
        handle: &ElementHandle,
        delivery: Delivery,
    ) -> eoka_harvest::Result<()> {
        self.clicks.borrow_mut().push(delivery);
        if handle.id() == "ai" && delivery == Delivery::Programmatic {
            self.open.set(true);
            self.rendered.set(8.min(self.lines.len()));
        }
        Ok(())
    }

    async fn extract_items(
        &self,
        _root: Option<&ElementHandle>,
        shape: &ItemShape,
    ) -> eoka_harvest::Result<Vec<ExtractedItem>> {
        if shape.item != "[class*='_Part_']" {
            return Ok(vec![]);
        }
        // Virtualized: only the last sixteen rendered lines are in the DOM.
        let end = self.rendered.get();
        Ok(self.lines[end.saturating_sub(16)..end].to_vec())
    }

    async fn container_text(&self, _root: Option<&ElementHandle>) -> eoka_harvest::Result<String> {
        Ok(String::new())
    }

    async fn scroll_region(
        &self,
        _handle: &ElementHandle,
        _fraction: f64,
    ) -> eoka_harvest::Result<ScrollPosition> {
        self.rendered
            .set((self.rendered.get() + 8).min(self.lines.len()));
        Ok(ScrollPosition::default())
    }

    async fn scroll_window(&self, _fraction: f64) -> eoka_harvest::Result<ScrollPosition> {
        Ok(ScrollPosition::default())
    }
}

fn fast_builtin() -> Profile {
    let mut profile = Profile::builtin().unwrap();
    profile.interaction.poll.interval_ms = 1;
    profile.interaction.settle_ms = 0;
    profile.view.settle_ms = 0;
    profile.harvest.poll.interval_ms = 1;
    profile.harvest.poll.max_attempts = 40;
    profile
}

#[tokio::test]
async fn test_builtin_profile_harvests_virtualized_list() {
    let page = ScriptedPage::new(60);
    let result = harvest_dynamic_content(&page, &fast_builtin(), &CancellationToken::new())
        .await
        .expect("harvest should succeed");

    assert_eq!(result.trigger.candidate.handle.id(), "ai");
    assert_eq!(result.interaction.strategy, Some(Delivery::Programmatic));
    assert_eq!(result.status, HarvestStatus::Converged);
    assert_eq!(result.records.len(), 60);
    assert_eq!(result.records[0].content, "第0句字幕");
    assert_eq!(result.records[0].start, 0.0);
    assert_eq!(result.records[21].start, 63.0);
    assert!(result.records.iter().all(|r| r.end - r.start == 3.0));

    // Native click had its full window first, then the programmatic one worked.
    let clicks = page.clicks.borrow();
    assert_eq!(clicks[0], Delivery::Native);
    assert_eq!(clicks[1], Delivery::Programmatic);
}

#[tokio::test]
async fn test_iteration_cap_keeps_partial_records() {
    let page = ScriptedPage::new(200);
    let mut profile = fast_builtin();
    profile.harvest.poll.max_attempts = 5;
    let result = harvest_dynamic_content(&page, &profile, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.status, HarvestStatus::Incomplete);
    assert_eq!(result.records.len(), 40);
}

const ASSISTANT_PAGE: &str = r##"data:text/html;charset=utf-8,
<body style="margin:0;height:1200px">
<button id="ai" class="video-ai-assistant" title="AI小助手"
  style="position:fixed;right:40px;top:200px;width:40px;height:40px"></button>
<div id="panel" class="_VideoAssistant_x" data-video-assistant-subject-wrapper
  style="display:none;position:fixed;right:0;top:0;width:420px;height:700px;background:white">
  <div>AI小助手 视频总结 这是一段用于测试的面板说明文字，长度足够让面板被识别为内容区域。这里再补充一些描述，确保超过一百个字符的要求。</div>
  <div class="_Tab_x">字幕列表</div>
  <div id="content" data-video-assistant-subject-content style="height:500px;overflow:auto">
    <div id="list" data-video-assistant-subject-subtitles></div>
  </div>
</div>
<script>
  let shown = 0;
  function more() {
    const list = document.getElementById('list');
    for (let k = 0; k < 10 && shown < 40; k++, shown++) {
      const d = document.createElement('div');
      d.className = '_Part_';
      d.style.height = '60px';
      d.innerHTML = '<span class="_TimeText_">00:' + String(shown).padStart(2, '0') +
        '</span> <span class="_Text_">line ' + shown + '</span>';
      list.appendChild(d);
    }
  }
  document.getElementById('ai').addEventListener('click', () => {
    document.getElementById('panel').style.display = 'block';
    more();
  });
  document.getElementById('content').addEventListener('scroll', (e) => {
    const c = e.target;
    if (c.scrollTop + c.clientHeight >= c.scrollHeight - 10) more();
  });
</script>
</body>
"##;

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_harvest_against_real_page() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let browser = eoka::Browser::launch()
        .await
        .expect("Failed to launch browser");
    let page = browser
        .new_page("about:blank")
        .await
        .expect("Failed to create page");
    page.goto(ASSISTANT_PAGE).await.expect("Failed to navigate");

    let mut profile = Profile::builtin().unwrap();
    profile.trigger.patterns = vec!["button".into()];
    profile.interaction.settle_ms = 200;
    profile.view.settle_ms = 200;
    profile.harvest.poll.interval_ms = 300;

    let live = EokaPage::new(&page);
    let result = harvest_dynamic_content(&live, &profile, &CancellationToken::new())
        .await
        .expect("harvest should succeed");

    assert_eq!(result.records.len(), 40, "{:?}", result.status);
    assert_eq!(result.records[0].content, "line 0");
    assert_eq!(result.records[39].start, 39.0);

    browser.close().await.expect("Failed to close browser");
}

#[tokio::test]
#[ignore = "requires Chrome"]
async fn test_element_handles_survive_between_calls() {
    if !chrome_available() {
        eprintln!("Chrome not found, skipping test");
        return;
    }

    let browser = eoka::Browser::launch()
        .await
        .expect("Failed to launch browser");
    let page = browser
        .new_page("about:blank")
        .await
        .expect("Failed to create page");
    page.goto(ASSISTANT_PAGE).await.expect("Failed to navigate");

    let live = EokaPage::new(&page);
    let found = live.query(None, "button").await.expect("query");
    assert_eq!(found.len(), 1);
    let again = live.query(None, "button").await.expect("query");
    assert_eq!(found[0].handle, again[0].handle);

    live.deliver(&found[0].handle, Delivery::Programmatic)
        .await
        .expect("click");
    assert!(live.count_text("视频总结").await.expect("count") > 0);

    let stale = ElementHandle::new("999999");
    assert!(live.scroll_into_view(&stale).await.is_err());

    browser.close().await.expect("Failed to close browser");
}
