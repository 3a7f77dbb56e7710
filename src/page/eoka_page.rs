//! `LivePage` over an eoka `Page`. Every read and most writes are one injected script.

use async_trait::async_trait;
use eoka::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    Candidate, Delivery, ElementHandle, ExtractedItem, ItemShape, LivePage, ScrollPosition,
    Viewport,
};
use crate::{Error, Result};

/// Page-side dispatcher. Elements are stamped with `data-eoka-harvest` the first
/// time they are described so later calls can address them by handle.
const PAGE_JS: &str = r#"
((op, args) => {
    const ATTR = 'data-eoka-harvest';
    const LIMIT = 500;
    const squash = s => (s || '').replace(/\s+/g, ' ').trim();
    const lc = s => squash(s).toLowerCase();

    function byHandle(id) {
        const el = document.querySelector('[' + ATTR + '="' + id + '"]');
        if (!el) throw new Error('stale element handle #' + id);
        return el;
    }
    const rootOf = id => (id == null ? document : byHandle(id));

    function visible(el) {
        const r = el.getBoundingClientRect();
        if (r.width <= 0 || r.height <= 0) return false;
        const s = getComputedStyle(el);
        return s.display !== 'none' && s.visibility !== 'hidden' && parseFloat(s.opacity) >= 0.1;
    }

    function stamp(el) {
        if (!el.hasAttribute(ATTR)) {
            window.__eokaHarvestSeq = (window.__eokaHarvestSeq || 0) + 1;
            el.setAttribute(ATTR, String(window.__eokaHarvestSeq));
        }
        return el.getAttribute(ATTR);
    }

    function describe(el) {
        const r = el.getBoundingClientRect();
        const attrs = {};
        for (const a of el.attributes) {
            if (a.name !== ATTR && a.value.length <= 300) attrs[a.name] = a.value;
        }
        return {
            handle: stamp(el),
            tag: el.tagName.toLowerCase(),
            text: squash(el.innerText || el.textContent).slice(0, 4000),
            attrs,
            bbox: { x: r.x, y: r.y, width: r.width, height: r.height },
            visible: visible(el),
            enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
        };
    }

    function ownText(el) {
        let t = '';
        for (const n of el.childNodes) if (n.nodeType === 3) t += n.textContent;
        return lc(t);
    }

    function pick(item, sels) {
        for (const s of sels || []) {
            let e = null;
            try { e = item.querySelector(s); } catch (_) { continue; }
            const t = e ? squash(e.innerText || e.textContent) : '';
            if (t) return t;
        }
        return '';
    }

    const position = el => ({ top: el.scrollTop, height: el.scrollHeight, client_height: el.clientHeight });

    function run() {
        switch (op) {
            case 'viewport':
                return { width: window.innerWidth, height: window.innerHeight };
            case 'query':
                return [...rootOf(args.root).querySelectorAll(args.selector)].slice(0, LIMIT).map(describe);
            case 'query_text': {
                const needle = lc(args.text);
                const hits = [];
                for (const el of rootOf(args.root).querySelectorAll('*')) {
                    const own = ownText(el);
                    if (own && (args.exact ? own === needle : own.includes(needle))) hits.push(el);
                    if (hits.length >= LIMIT) break;
                }
                return hits.map(describe);
            }
            case 'count_text': {
                const needle = lc(args.fragment);
                let n = 0;
                for (const el of document.querySelectorAll('body *')) {
                    if (ownText(el).includes(needle) && visible(el)) n++;
                }
                return n;
            }
            case 'count_visible':
                return [...document.querySelectorAll(args.selector || '*')].filter(visible).length;
            case 'scroll_into_view':
                byHandle(args.handle).scrollIntoView({ block: 'center', behavior: 'smooth' });
                return true;
            case 'click':
                byHandle(args.handle).click();
                return true;
            case 'double_click': {
                const el = byHandle(args.handle);
                const r = el.getBoundingClientRect();
                const init = { bubbles: true, cancelable: true, view: window,
                               clientX: r.x + r.width / 2, clientY: r.y + r.height / 2 };
                for (let i = 1; i <= 2; i++) {
                    el.dispatchEvent(new MouseEvent('mousedown', { ...init, detail: i }));
                    el.dispatchEvent(new MouseEvent('mouseup', { ...init, detail: i }));
                    el.dispatchEvent(new MouseEvent('click', { ...init, detail: i }));
                }
                el.dispatchEvent(new MouseEvent('dblclick', { ...init, detail: 2 }));
                return true;
            }
            case 'focus': {
                const el = byHandle(args.handle);
                if (!el.hasAttribute('tabindex') && !/^(a|button|input|select|textarea)$/i.test(el.tagName)) {
                    el.setAttribute('tabindex', '-1');
                }
                el.focus();
                return document.activeElement === el;
            }
            case 'extract_items':
                return [...rootOf(args.root).querySelectorAll(args.shape.item)]
                    .filter(visible)
                    .slice(0, LIMIT)
                    .map(item => ({
                        time: pick(item, args.shape.time),
                        text: pick(item, args.shape.text),
                        full: squash(item.innerText || item.textContent),
                    }));
            case 'container_text': {
                const el = args.root == null ? document.body : byHandle(args.root);
                return el.innerText || el.textContent || '';
            }
            case 'scroll_region': {
                const el = byHandle(args.handle);
                if (el.scrollHeight <= el.clientHeight) throw new Error('element #' + args.handle + ' is not scrollable');
                el.scrollTop += el.clientHeight * args.fraction;
                return position(el);
            }
            case 'scroll_window':
                window.scrollBy(0, window.innerHeight * args.fraction);
                return position(document.scrollingElement || document.documentElement);
        }
        throw new Error('unknown op ' + op);
    }

    try {
        return { ok: true, value: run() };
    } catch (e) {
        return { ok: false, error: String((e && e.message) || e) };
    }
})
"#;

/// Envelope every `PAGE_JS` call returns.
#[derive(Debug, Deserialize)]
struct Reply<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    value: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Wraps an eoka `Page` as a [`LivePage`].
pub struct EokaPage<'a> {
    page: &'a Page,
}

impl<'a> EokaPage<'a> {
    pub fn new(page: &'a Page) -> Self {
        Self { page }
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, args: serde_json::Value) -> Result<T> {
        let js = format!(
            "{}({},{})",
            PAGE_JS,
            serde_json::to_string(op)?,
            serde_json::to_string(&args)?
        );
        let reply: Reply<T> = self.page.evaluate(&js).await?;
        match reply {
            Reply {
                ok: true,
                value: Some(value),
                ..
            } => Ok(value),
            Reply { error, .. } => Err(Error::ActionFailed(format!(
                "{}: {}",
                op,
                error.unwrap_or_else(|| "no value returned".into())
            ))),
        }
    }
}

fn root_arg(root: Option<&ElementHandle>) -> serde_json::Value {
    match root {
        Some(h) => json!(h.id()),
        None => serde_json::Value::Null,
    }
}

#[async_trait(?Send)]
impl LivePage for EokaPage<'_> {
    async fn viewport(&self) -> Result<Viewport> {
        self.call("viewport", json!({})).await
    }

    async fn query(&self, root: Option<&ElementHandle>, selector: &str) -> Result<Vec<Candidate>> {
        self.call("query", json!({ "root": root_arg(root), "selector": selector }))
            .await
    }

    async fn query_text(
        &self,
        root: Option<&ElementHandle>,
        text: &str,
        exact: bool,
    ) -> Result<Vec<Candidate>> {
        self.call(
            "query_text",
            json!({ "root": root_arg(root), "text": text, "exact": exact }),
        )
        .await
    }

    async fn count_text(&self, fragment: &str) -> Result<usize> {
        self.call("count_text", json!({ "fragment": fragment })).await
    }

    async fn count_visible(&self, selector: Option<&str>) -> Result<usize> {
        self.call("count_visible", json!({ "selector": selector }))
            .await
    }

    async fn scroll_into_view(&self, handle: &ElementHandle) -> Result<()> {
        let _: bool = self
            .call("scroll_into_view", json!({ "handle": handle.id() }))
            .await?;
        Ok(())
    }

    async fn deliver(&self, handle: &ElementHandle, delivery: Delivery) -> Result<()> {
        debug!("{} on {}", delivery, handle);
        let args = json!({ "handle": handle.id() });
        match delivery {
            Delivery::Native => self.page.click(&handle.selector()).await?,
            Delivery::Programmatic => {
                let _: bool = self.call("click", args).await?;
            }
            Delivery::Pointer => self.page.human_click(&handle.selector()).await?,
            Delivery::DoubleClick => {
                let _: bool = self.call("double_click", args).await?;
            }
            Delivery::Keyboard => {
                let focused: bool = self.call("focus", args).await?;
                if !focused {
                    return Err(Error::ActionFailed(format!("{} did not take focus", handle)));
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                self.page.human().press_key("Enter").await?;
            }
        }
        Ok(())
    }

    async fn extract_items(
        &self,
        root: Option<&ElementHandle>,
        shape: &ItemShape,
    ) -> Result<Vec<ExtractedItem>> {
        self.call(
            "extract_items",
            json!({ "root": root_arg(root), "shape": shape }),
        )
        .await
    }

    async fn container_text(&self, root: Option<&ElementHandle>) -> Result<String> {
        self.call("container_text", json!({ "root": root_arg(root) }))
            .await
    }

    async fn scroll_region(&self, handle: &ElementHandle, fraction: f64) -> Result<ScrollPosition> {
        self.call(
            "scroll_region",
            json!({ "handle": handle.id(), "fraction": fraction }),
        )
        .await
    }

    async fn scroll_window(&self, fraction: f64) -> Result<ScrollPosition> {
        self.call("scroll_window", json!({ "fraction": fraction }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_ok_deserializes_value() {
        let reply: Reply<usize> = serde_json::from_str(r#"{"ok":true,"value":3}"#).unwrap();
        assert!(reply.ok);
        assert_eq!(reply.value, Some(3));
    }

    #[test]
    fn test_reply_error_has_message() {
        let reply: Reply<Vec<Candidate>> =
            serde_json::from_str(r#"{"ok":false,"error":"stale element handle #4"}"#).unwrap();
        assert!(!reply.ok);
        assert!(reply.value.is_none());
        assert_eq!(reply.error.as_deref(), Some("stale element handle #4"));
    }

    #[test]
    fn test_candidate_from_page_json() {
        let raw = r#"{
            "handle": "12",
            "tag": "div",
            "text": "AI小助手",
            "attrs": {"class": "video-ai-assistant", "data-name": "ai"},
            "bbox": {"x": 1500, "y": 300, "width": 40, "height": 40},
            "visible": true,
            "enabled": true
        }"#;
        let c: Candidate = serde_json::from_str(raw).unwrap();
        assert_eq!(c.handle.id(), "12");
        assert_eq!(c.class(), "video-ai-assistant");
        assert_eq!(c.bbox.width, 40.0);
    }

    #[test]
    fn test_scroll_position_from_page_json() {
        let pos: ScrollPosition =
            serde_json::from_str(r#"{"top":320,"height":2400,"client_height":400}"#).unwrap();
        assert_eq!(pos.top, 320.0);
        assert_eq!(pos.client_height, 400.0);
    }

    #[test]
    fn test_root_arg_is_null_for_page() {
        assert!(root_arg(None).is_null());
        assert_eq!(root_arg(Some(&ElementHandle::new("9"))), json!("9"));
    }
}
