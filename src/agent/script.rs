//! JavaScript rendition of the page agent, injected by browser backends.
//!
//! The script installs `window.__fullshotAgent` once per document. Its
//! `handle` function takes the JSON encoding of an [`AgentRequest`] and
//! resolves to the JSON encoding of an [`AgentResponse`].

use super::{AgentRequest, AgentResponse};
use crate::{Error, Result};
use std::time::Duration;

/// Global the agent installs itself under
pub const AGENT_GLOBAL: &str = "__fullshotAgent";

/// Source of the injectable agent. Re-injecting into a document that
/// already hosts the agent is a no-op.
pub const AGENT_SCRIPT: &str = r#"(function(){
  if (window.__fullshotAgent) { return true; }
  const sleep = (ms) => new Promise(r => setTimeout(r, ms));
  let hidden = [];

  function extent(el) {
    if (!el) { return { sw: 0, sh: 0, cw: 0, ch: 0, oh: 0 }; }
    return { sw: el.scrollWidth, sh: el.scrollHeight, cw: el.clientWidth, ch: el.clientHeight, oh: el.offsetHeight };
  }

  function containerExtent() {
    let w = 0, h = 0;
    document.querySelectorAll('[style*="overflow"], .scroll-container, .scrollable, main, [role="main"]').forEach(el => {
      const s = window.getComputedStyle(el);
      const scrolls = v => v === 'auto' || v === 'scroll';
      if (scrolls(s.overflow) || scrolls(s.overflowY)) {
        w = Math.max(w, el.scrollWidth);
        h = Math.max(h, el.scrollHeight);
      }
    });
    return { w, h };
  }

  function metrics() {
    const root = extent(document.documentElement);
    const body = extent(document.body);
    const c = containerExtent();
    return {
      kind: 'metrics',
      totalWidth: Math.ceil(Math.max(root.sw, root.cw, body.sw, body.cw, window.innerWidth, c.w)),
      totalHeight: Math.ceil(Math.max(root.sh, root.ch, body.sh, body.ch, root.oh, body.oh, window.innerHeight, c.h)),
      viewportWidth: window.innerWidth,
      viewportHeight: window.innerHeight,
      devicePixelRatio: window.devicePixelRatio || 1,
      scrollX: window.scrollX || window.pageXOffset || 0,
      scrollY: window.scrollY || window.pageYOffset || 0
    };
  }

  async function scrollTo(y, settleMs) {
    const target = document.scrollingElement || document.documentElement || document.body;
    target.scrollTo({ top: y, left: 0, behavior: 'auto' });
    void (document.body && document.body.offsetHeight);
    window.dispatchEvent(new Event('scroll'));
    window.dispatchEvent(new Event('resize'));
    await sleep(settleMs === undefined ? 200 : settleMs);
    await sleep(100);
    return { kind: 'ack' };
  }

  function hideFixed() {
    const selectors = [
      '[style*="position: fixed"]', '[style*="position:fixed"]',
      '[style*="position: sticky"]', '[style*="position:sticky"]',
      '.fixed', '.sticky', '.header-fixed', '.navbar-fixed',
      'header[style*="fixed"]', 'nav[style*="fixed"]',
      '[data-fixed="true"]', '[data-sticky="true"]'
    ];
    document.querySelectorAll(selectors.join(',')).forEach(el => {
      const pos = window.getComputedStyle(el).position;
      if ((pos === 'fixed' || pos === 'sticky') && !hidden.some(h => h.el === el)) {
        hidden.push({ el, display: el.style.display });
        el.style.display = 'none';
      }
    });
    return { kind: 'hidden', hiddenCount: hidden.length };
  }

  function restoreFixed() {
    for (const h of hidden) { if (h.el) { h.el.style.display = h.display; } }
    hidden = [];
    return { kind: 'ack' };
  }

  async function dispatch(req) {
    switch (req.type) {
      case 'GET_METRICS': return metrics();
      case 'SCROLL_TO': return scrollTo(req.y, req.settleMs);
      case 'HIDE_FIXED': return hideFixed();
      case 'RESTORE_FIXED': return restoreFixed();
      case 'RESTORE_SCROLL': window.scrollTo(req.x, req.y); return { kind: 'ack' };
      default: return { kind: 'error', message: 'unknown request ' + req.type };
    }
  }

  window.__fullshotAgent = {
    handle: async function(raw) {
      try {
        return JSON.stringify(await dispatch(JSON.parse(raw)));
      } catch (e) {
        return JSON.stringify({ kind: 'error', message: String(e) });
      }
    }
  };
  return true;
})()"#;

/// Message the in-page race resolves with when a request outlives its budget
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Build the expression that runs `request` through the injected agent.
///
/// The request JSON is embedded as a JS string literal, so it goes through
/// `serde_json` twice. The agent call races a timer of `timeout`, which
/// resolves with an error response carrying [`TIMEOUT_MESSAGE`].
pub fn request_expression(request: &AgentRequest, timeout: Duration) -> Result<String> {
    let json = serde_json::to_string(request)
        .map_err(|e| Error::Protocol(format!("Failed to encode {}: {}", request.name(), e)))?;
    let literal = serde_json::to_string(&json)
        .map_err(|e| Error::Protocol(format!("Failed to quote {}: {}", request.name(), e)))?;
    Ok(format!(
        "(window.{g} ? Promise.race([window.{g}.handle({lit}), new Promise(r => setTimeout(() => \
         r(JSON.stringify({{kind: 'error', message: '{msg}'}})), {ms}))]) \
         : Promise.reject(new Error('agent not injected')))",
        g = AGENT_GLOBAL,
        lit = literal,
        msg = TIMEOUT_MESSAGE,
        ms = timeout.as_millis()
    ))
}

/// Decode the string an agent expression resolved with. The timer branch
/// of the race becomes [`Error::Timeout`].
pub fn parse_response(request: &AgentRequest, raw: &str, timeout: Duration) -> Result<AgentResponse> {
    let response: AgentResponse = serde_json::from_str(raw)
        .map_err(|e| Error::Protocol(format!("Malformed {} response {:?}: {}", request.name(), raw, e)))?;
    match response {
        AgentResponse::Error { ref message } if message == TIMEOUT_MESSAGE => {
            Err(Error::Timeout(timeout.as_millis() as u64))
        }
        other => Ok(other),
    }
}
