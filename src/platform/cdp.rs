//! Chrome DevTools Protocol backend (uses the `headless_chrome` crate)
//!
//! Launches one headless Chrome window and tracks the tabs opened through
//! [`CdpBrowser::open`]. The page agent is installed with `Runtime.evaluate`
//! and every request is a single promise-awaiting evaluation, so the CDP
//! round trip doubles as the agent's message channel. Request budgets are
//! enforced inside the page by racing the agent call against a timer.

use super::{BrowserControl, TabInfo};
use crate::agent::script::{parse_response, request_expression, AGENT_SCRIPT};
use crate::agent::{AgentRequest, AgentResponse};
use crate::{CaptureConfig, Error, Result, TabId, Viewport, WindowId};
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// The only window a headless launch has
pub const CDP_WINDOW: WindowId = WindowId(1);

const NAVIGATION_SETTLE: Duration = Duration::from_millis(500);

pub struct CdpBrowser {
    browser: Browser,
    tabs: Mutex<BTreeMap<TabId, Arc<Tab>>>,
    active: Mutex<Option<TabId>>,
    next_id: AtomicU64,
    viewport: Viewport,
}

/// Holds the tab handle for the duration of a capture
pub struct CdpKeepAlive {
    tab_id: TabId,
    _tab: Arc<Tab>,
}

impl Drop for CdpKeepAlive {
    fn drop(&mut self) {
        debug!("keep-alive for tab {} disconnected", self.tab_id);
    }
}

impl CdpBrowser {
    /// Launch headless Chrome with a window the size of `config.viewport`
    pub fn launch(config: &CaptureConfig) -> Result<Self> {
        config.validate()?;

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::CdpError(format!("Failed to build launch options: {}", e)))?;

        let browser =
            Browser::new(launch_options).map_err(|e| Error::CdpError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            tabs: Mutex::new(BTreeMap::new()),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            viewport: config.viewport,
        })
    }

    /// Open `url` in a new tab and wait for it to load. The new tab becomes
    /// the active one.
    pub fn open(&self, url: &str) -> Result<TabId> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::CdpError(format!("Failed to create tab: {}", e)))?;

        tab.navigate_to(url)
            .map_err(|e| Error::CdpError(format!("Navigation failed: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| Error::CdpError(format!("Wait for navigation failed: {}", e)))?;

        // Let late layout and web fonts land before anyone measures the page
        std::thread::sleep(NAVIGATION_SETTLE);

        let id = TabId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tabs()?.insert(id, tab);
        *self.active()? = Some(id);
        debug!("opened tab {} at {}", id, url);
        Ok(id)
    }

    pub fn close(&self, id: TabId) -> Result<()> {
        let tab = self.tabs()?.remove(&id).ok_or(Error::NotFound(id))?;
        {
            let mut active = self.active()?;
            if *active == Some(id) {
                *active = None;
            }
        }
        tab.close(false)
            .map_err(|e| Error::CdpError(format!("Failed to close tab {}: {}", id, e)))?;
        Ok(())
    }

    fn tabs(&self) -> Result<MutexGuard<'_, BTreeMap<TabId, Arc<Tab>>>> {
        self.tabs
            .lock()
            .map_err(|_| Error::Platform("tab registry lock poisoned".into()))
    }

    fn active(&self) -> Result<MutexGuard<'_, Option<TabId>>> {
        self.active
            .lock()
            .map_err(|_| Error::Platform("active tab lock poisoned".into()))
    }

    fn tab(&self, id: TabId) -> Result<Arc<Tab>> {
        self.tabs()?.get(&id).cloned().ok_or(Error::NotFound(id))
    }
}

impl BrowserControl for CdpBrowser {
    type KeepAlive = CdpKeepAlive;

    fn query_tab(&self, id: TabId) -> Result<Option<TabInfo>> {
        let Some(tab) = self.tabs()?.get(&id).cloned() else {
            return Ok(None);
        };
        let title = tab.get_title().unwrap_or_else(|e| {
            warn!("Failed to get title of tab {}: {}", id, e);
            String::new()
        });
        Ok(Some(TabInfo {
            id,
            window_id: CDP_WINDOW,
            url: tab.get_url(),
            title,
            width: Some(self.viewport.width),
            height: Some(self.viewport.height),
        }))
    }

    fn focus_window(&self, window: WindowId) -> Result<()> {
        if window == CDP_WINDOW {
            Ok(())
        } else {
            Err(Error::Platform(format!("No such window: {}", window.0)))
        }
    }

    fn activate_tab(&self, id: TabId) -> Result<()> {
        let tab = self.tab(id)?;
        tab.activate()
            .map_err(|e| Error::Platform(format!("Failed to activate tab {}: {}", id, e)))?;
        *self.active()? = Some(id);
        Ok(())
    }

    fn inject_agent(&self, id: TabId) -> Result<()> {
        self.tab(id)?
            .evaluate(AGENT_SCRIPT, false)
            .map_err(|e| Error::Injection(format!("tab {}: {}", id, e)))?;
        Ok(())
    }

    fn connect_keepalive(&self, id: TabId) -> Result<CdpKeepAlive> {
        Ok(CdpKeepAlive {
            tab_id: id,
            _tab: self.tab(id)?,
        })
    }

    fn send_request(&self, id: TabId, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse> {
        let expression = request_expression(request, timeout)?;
        let remote = self
            .tab(id)?
            .evaluate(&expression, true)
            .map_err(|e| Error::Messaging(format!("{} to tab {}: {}", request.name(), id, e)))?;

        let raw = remote
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol(format!("{} returned no string payload", request.name())))?;
        parse_response(request, raw, timeout)
    }

    fn capture_visible(&self, window: WindowId) -> Result<Vec<u8>> {
        self.focus_window(window)?;
        let active = (*self.active()?).ok_or_else(|| Error::Platform("No active tab".into()))?;
        self.tab(active)?
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| Error::Platform(format!("Screenshot failed: {}", e)))
    }
}
