//! Deterministic in-process browser.
//!
//! Pages are synthetic: every page row is painted with [`page_color`] of its
//! CSS y coordinate, and visible fixed elements cover a band at the top of
//! the viewport in [`FIXED_BAND_COLOR`]. That makes stitched output easy to
//! check row by row. Faults can be injected per tab to exercise the capture
//! policy.

use super::{BrowserControl, TabInfo, KEEPALIVE_CHANNEL};
use crate::agent::{
    AgentRequest, AgentResponse, ComputedStyle, Document, ElementId, ElementInfo, Extent, Overflow, PageAgent,
    PageEvent, Position,
};
use crate::{is_capturable, Error, Result, TabId, WindowId};
use image::{Rgba, RgbaImage};
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Color of a fixed/sticky element band in simulated captures
pub const FIXED_BAND_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Color of page row `y` (CSS pixels) in simulated captures
pub fn page_color(y: u32) -> Rgba<u8> {
    Rgba([(y % 251) as u8, ((y / 251) % 251) as u8, 200, 255])
}

#[derive(Debug, Clone)]
struct SimElement {
    info: ElementInfo,
    display: Option<String>,
    /// Height of the band painted at the top of the viewport while visible
    band_height: u32,
}

/// A synthetic document
#[derive(Debug, Clone)]
pub struct SimulatedPage {
    pub url: String,
    pub title: String,
    total_width: u32,
    total_height: u32,
    viewport: (u32, u32),
    dpr: f64,
    scroll: (f64, f64),
    /// Root height differs from the content height when an inner container scrolls
    root_height: u32,
    elements: Vec<SimElement>,
    events: Vec<PageEvent>,
    layout_flushes: usize,
}

impl SimulatedPage {
    pub fn new(url: &str, total_width: u32, total_height: u32, viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            url: url.to_string(),
            title: "Simulated Page".to_string(),
            total_width,
            total_height,
            viewport: (viewport_width, viewport_height),
            dpr: 1.0,
            scroll: (0.0, 0.0),
            root_height: total_height,
            elements: Vec::new(),
            events: Vec::new(),
            layout_flushes: 0,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_device_pixel_ratio(mut self, dpr: f64) -> Self {
        self.dpr = dpr;
        self
    }

    pub fn with_scroll(mut self, x: f64, y: f64) -> Self {
        self.scroll = (x, y);
        self
    }

    /// Add a `position: fixed` header painted over the top `height` CSS
    /// pixels of every viewport until hidden.
    pub fn with_fixed_header(mut self, height: u32) -> Self {
        let id = ElementId(self.elements.len());
        self.elements.push(SimElement {
            info: ElementInfo {
                id,
                tag: "header".into(),
                inline_style: "position: fixed; top: 0".into(),
                computed: ComputedStyle {
                    position: Position::Fixed,
                    ..Default::default()
                },
                ..Default::default()
            },
            display: Some("block".into()),
            band_height: height,
        });
        self
    }

    /// Make the document root viewport-sized and move the content into a
    /// scrolling `<main>`, the way single-page apps often lay out.
    pub fn with_inner_scroll_container(mut self) -> Self {
        self.root_height = self.viewport.1;
        let id = ElementId(self.elements.len());
        self.elements.push(SimElement {
            info: ElementInfo {
                id,
                tag: "main".into(),
                computed: ComputedStyle {
                    overflow_y: Overflow::Auto,
                    ..Default::default()
                },
                scroll_width: self.total_width,
                scroll_height: self.total_height,
                ..Default::default()
            },
            display: None,
            band_height: 0,
        });
        self
    }

    pub fn scroll(&self) -> (f64, f64) {
        self.scroll
    }

    pub fn events(&self) -> &[PageEvent] {
        &self.events
    }

    /// Whether every fixed element is currently displayed as it was
    /// authored
    pub fn fixed_elements_visible(&self) -> bool {
        self.elements
            .iter()
            .filter(|e| e.band_height > 0)
            .all(|e| e.display.as_deref() != Some("none"))
    }

    fn max_scroll_y(&self) -> f64 {
        f64::from(self.total_height.saturating_sub(self.viewport.1))
    }

    /// Render the visible viewport at device-pixel resolution
    pub fn render_viewport(&self) -> RgbaImage {
        let width = ((f64::from(self.viewport.0) * self.dpr).round() as u32).max(1);
        let height = ((f64::from(self.viewport.1) * self.dpr).round() as u32).max(1);
        let band = self
            .elements
            .iter()
            .filter(|e| e.display.as_deref() != Some("none"))
            .map(|e| e.band_height)
            .max()
            .unwrap_or(0);
        let top = self.scroll.1.max(0.0);

        RgbaImage::from_fn(width, height, |_, row| {
            let css_row = f64::from(row) / self.dpr;
            if css_row < f64::from(band) {
                FIXED_BAND_COLOR
            } else {
                page_color((top + css_row).floor() as u32)
            }
        })
    }
}

impl Document for SimulatedPage {
    fn root_extent(&self) -> Extent {
        Extent {
            scroll_width: self.total_width,
            scroll_height: self.root_height,
            client_width: self.viewport.0,
            client_height: self.viewport.1,
            offset_height: self.root_height,
        }
    }

    fn body_extent(&self) -> Option<Extent> {
        None
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.dpr
    }

    fn scroll_position(&self) -> (f64, f64) {
        self.scroll
    }

    fn elements(&self) -> Vec<ElementInfo> {
        self.elements.iter().map(|e| e.info.clone()).collect()
    }

    fn inline_display(&self, id: ElementId) -> Option<String> {
        self.elements.get(id.0).and_then(|e| e.display.clone())
    }

    fn set_inline_display(&mut self, id: ElementId, display: Option<&str>) -> bool {
        match self.elements.get_mut(id.0) {
            Some(el) => {
                el.display = display.map(str::to_string);
                true
            }
            None => false,
        }
    }

    fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll = (x.max(0.0), y.clamp(0.0, self.max_scroll_y()));
    }

    fn flush_layout(&mut self) {
        self.layout_flushes += 1;
    }

    fn dispatch(&mut self, event: PageEvent) {
        self.events.push(event);
    }
}

/// Faults injected into one simulated tab
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Agent injection reports an error (the agent still ends up resident
    /// when `agent_preloaded` is set)
    pub fail_injection: bool,
    /// The agent is resident before any injection
    pub agent_preloaded: bool,
    /// Every agent request times out
    pub unresponsive: bool,
    /// Number of upcoming `GET_METRICS` requests that time out
    pub metrics_timeouts: u32,
    /// `HIDE_FIXED` times out
    pub hide_timeout: bool,
    /// `SCROLL_TO` requests for these offsets time out
    pub scroll_timeouts: HashSet<u32>,
    /// Number of upcoming visible captures of this tab that fail
    pub capture_failures: u32,
    /// Focusing/activating this tab fails
    pub activation_fails: bool,
    /// Opening the keep-alive channel fails
    pub keepalive_fails: bool,
}

/// One observable call into the simulated browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interaction {
    Focused(WindowId),
    Activated(TabId),
    Injected(TabId),
    KeepAliveOpened(TabId),
    KeepAliveClosed(TabId),
    Request(TabId, &'static str),
    Captured(TabId),
}

struct SimTab {
    window: WindowId,
    active: bool,
    injected: bool,
    agent: PageAgent<SimulatedPage>,
    faults: Faults,
}

#[derive(Default)]
struct BrowserState {
    next_tab: u64,
    tabs: BTreeMap<TabId, SimTab>,
    focused: Option<WindowId>,
    open_keepalives: usize,
    interactions: Vec<Interaction>,
}

/// Simulated browser shared by the controller and the test driving it
#[derive(Clone, Default)]
pub struct SimulatedBrowser {
    state: Arc<Mutex<BrowserState>>,
}

/// Keep-alive channel of the simulated browser
pub struct SimulatedKeepAlive {
    tab: TabId,
    state: Arc<Mutex<BrowserState>>,
}

impl Drop for SimulatedKeepAlive {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.open_keepalives = state.open_keepalives.saturating_sub(1);
            state.interactions.push(Interaction::KeepAliveClosed(self.tab));
        }
    }
}

impl SimulatedBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BrowserState>> {
        self.state
            .lock()
            .map_err(|_| Error::Platform("simulated browser state poisoned".into()))
    }

    /// Open `page` as the active tab of window 1
    pub fn open(&self, page: SimulatedPage) -> TabId {
        self.open_in_window(WindowId(1), page)
    }

    pub fn open_in_window(&self, window: WindowId, page: SimulatedPage) -> TabId {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.next_tab += 1;
        let id = TabId(state.next_tab);
        for tab in state.tabs.values_mut().filter(|t| t.window == window) {
            tab.active = false;
        }
        state.tabs.insert(
            id,
            SimTab {
                window,
                active: true,
                injected: false,
                agent: PageAgent::new(page).with_dynamic_content_delay(Duration::ZERO),
                faults: Faults::default(),
            },
        );
        if state.focused.is_none() {
            state.focused = Some(window);
        }
        id
    }

    pub fn close(&self, tab: TabId) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.tabs.remove(&tab);
    }

    pub fn set_faults(&self, tab: TabId, faults: Faults) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(t) = state.tabs.get_mut(&tab) {
            t.injected = t.injected || faults.agent_preloaded;
            t.faults = faults;
        }
    }

    /// Current state of a tab's document
    pub fn page(&self, tab: TabId) -> Option<SimulatedPage> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.tabs.get(&tab).map(|t| t.agent.document().clone())
    }

    pub fn interactions(&self) -> Vec<Interaction> {
        self.state
            .lock()
            .map(|s| s.interactions.clone())
            .unwrap_or_default()
    }

    /// Interactions that touched `tab`
    pub fn interactions_with(&self, tab: TabId) -> Vec<Interaction> {
        self.interactions()
            .into_iter()
            .filter(|i| match i {
                Interaction::Activated(t)
                | Interaction::Injected(t)
                | Interaction::KeepAliveOpened(t)
                | Interaction::KeepAliveClosed(t)
                | Interaction::Request(t, _)
                | Interaction::Captured(t) => *t == tab,
                Interaction::Focused(_) => false,
            })
            .collect()
    }

    pub fn open_keepalives(&self) -> usize {
        self.state.lock().map(|s| s.open_keepalives).unwrap_or(0)
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.state.lock().ok().and_then(|s| s.focused)
    }

    pub fn active_tab(&self, window: WindowId) -> Option<TabId> {
        let state = self.state.lock().ok()?;
        state
            .tabs
            .iter()
            .find(|(_, t)| t.window == window && t.active)
            .map(|(id, _)| *id)
    }
}

fn timeout_error(timeout: Duration) -> Error {
    Error::Timeout(timeout.as_millis() as u64)
}

impl BrowserControl for SimulatedBrowser {
    type KeepAlive = SimulatedKeepAlive;

    fn query_tab(&self, tab: TabId) -> Result<Option<TabInfo>> {
        let state = self.lock()?;
        Ok(state.tabs.get(&tab).map(|t| {
            let page = t.agent.document();
            TabInfo {
                id: tab,
                window_id: t.window,
                url: page.url.clone(),
                title: page.title.clone(),
                width: Some(page.viewport.0),
                height: Some(page.viewport.1),
            }
        }))
    }

    fn focus_window(&self, window: WindowId) -> Result<()> {
        let mut state = self.lock()?;
        if !state.tabs.values().any(|t| t.window == window) {
            return Err(Error::Platform(format!("No window with id {}", window.0)));
        }
        state.focused = Some(window);
        state.interactions.push(Interaction::Focused(window));
        Ok(())
    }

    fn activate_tab(&self, tab: TabId) -> Result<()> {
        let mut state = self.lock()?;
        let window = match state.tabs.get(&tab) {
            Some(t) if t.faults.activation_fails => {
                return Err(Error::Platform(format!("Cannot activate tab {}", tab)))
            }
            Some(t) => t.window,
            None => return Err(Error::NotFound(tab)),
        };
        for (id, t) in state.tabs.iter_mut().filter(|(_, t)| t.window == window) {
            t.active = *id == tab;
        }
        state.interactions.push(Interaction::Activated(tab));
        Ok(())
    }

    fn inject_agent(&self, tab: TabId) -> Result<()> {
        let mut state = self.lock()?;
        let t = state.tabs.get_mut(&tab).ok_or(Error::NotFound(tab))?;
        if t.faults.fail_injection {
            return Err(Error::Injection(format!("Cannot access contents of tab {}", tab)));
        }
        if !is_capturable(&t.agent.document().url) {
            return Err(Error::Injection(format!(
                "Cannot access a restricted URL: {}",
                t.agent.document().url
            )));
        }
        t.injected = true;
        state.interactions.push(Interaction::Injected(tab));
        Ok(())
    }

    fn connect_keepalive(&self, tab: TabId) -> Result<SimulatedKeepAlive> {
        let mut state = self.lock()?;
        let t = state.tabs.get(&tab).ok_or(Error::NotFound(tab))?;
        if t.faults.keepalive_fails || !t.injected {
            return Err(Error::Messaging(format!(
                "Could not open {} channel to tab {}",
                KEEPALIVE_CHANNEL, tab
            )));
        }
        state.open_keepalives += 1;
        state.interactions.push(Interaction::KeepAliveOpened(tab));
        Ok(SimulatedKeepAlive {
            tab,
            state: Arc::clone(&self.state),
        })
    }

    fn send_request(&self, tab: TabId, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse> {
        let mut state = self.lock()?;
        state.interactions.push(Interaction::Request(tab, request.name()));
        let t = state.tabs.get_mut(&tab).ok_or(Error::NotFound(tab))?;
        if !t.injected {
            return Err(Error::Messaging(
                "Could not establish connection. Receiving end does not exist.".into(),
            ));
        }

        let faults = &mut t.faults;
        let times_out = faults.unresponsive
            || match request {
                AgentRequest::GetMetrics if faults.metrics_timeouts > 0 => {
                    faults.metrics_timeouts -= 1;
                    true
                }
                AgentRequest::HideFixed => faults.hide_timeout,
                AgentRequest::ScrollTo { y, .. } => faults.scroll_timeouts.contains(y),
                _ => false,
            };
        if times_out {
            debug!("simulated {} to tab {} timed out", request.name(), tab);
            return Err(timeout_error(timeout));
        }

        let wire = serde_json::to_string(request)
            .map_err(|e| Error::Protocol(format!("Failed to encode {}: {}", request.name(), e)))?;
        let reply = t.agent.handle_json(&wire)?;
        serde_json::from_str(&reply).map_err(|e| Error::Protocol(format!("Malformed agent response: {}", e)))
    }

    fn capture_visible(&self, window: WindowId) -> Result<Vec<u8>> {
        let mut state = self.lock()?;
        let (id, t) = state
            .tabs
            .iter_mut()
            .find(|(_, t)| t.window == window && t.active)
            .ok_or_else(|| Error::Platform(format!("No active tab in window {}", window.0)))?;
        let id = *id;
        if t.faults.capture_failures > 0 {
            t.faults.capture_failures -= 1;
            return Err(Error::Platform("Failed to capture tab: image readback failed".into()));
        }
        let page = t.agent.document();
        if !is_capturable(&page.url) {
            return Err(Error::Platform(format!("Cannot access contents of url \"{}\"", page.url)));
        }
        let png = crate::stitch::encode_png(&page.render_viewport())?;
        state.interactions.push(Interaction::Captured(id));
        Ok(png)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrolling_is_clamped_to_the_document() {
        let mut page = SimulatedPage::new("https://example.com/", 800, 1000, 800, 400);
        page.scroll_to(0.0, 5000.0);
        assert_eq!(page.scroll(), (0.0, 600.0));
        page.scroll_to(0.0, -10.0);
        assert_eq!(page.scroll(), (0.0, 0.0));
    }

    #[test]
    fn viewport_render_shows_rows_and_fixed_band() {
        let mut page = SimulatedPage::new("https://example.com/", 10, 1000, 10, 100)
            .with_fixed_header(20)
            .with_device_pixel_ratio(2.0);
        page.scroll_to(0.0, 300.0);
        let img = page.render_viewport();
        assert_eq!(img.dimensions(), (20, 200));
        assert_eq!(*img.get_pixel(0, 0), FIXED_BAND_COLOR);
        assert_eq!(*img.get_pixel(0, 40), page_color(320));
        assert_eq!(*img.get_pixel(5, 199), page_color(399));
    }

    #[test]
    fn capture_sees_only_the_active_tab() {
        let browser = SimulatedBrowser::new();
        let first = browser.open(SimulatedPage::new("https://a.example/", 10, 100, 10, 50));
        let second = browser.open(SimulatedPage::new("https://b.example/", 10, 100, 10, 50));
        assert_eq!(browser.active_tab(WindowId(1)), Some(second));

        browser.capture_visible(WindowId(1)).unwrap();
        browser.activate_tab(first).unwrap();
        browser.capture_visible(WindowId(1)).unwrap();

        assert_eq!(browser.interactions_with(second), vec![Interaction::Captured(second)]);
        assert_eq!(
            browser.interactions_with(first),
            vec![Interaction::Activated(first), Interaction::Captured(first)]
        );
    }

    #[test]
    fn requests_need_a_resident_agent() {
        let browser = SimulatedBrowser::new();
        let tab = browser.open(SimulatedPage::new("https://example.com/", 10, 100, 10, 50));
        let timeout = Duration::from_millis(5000);

        let err = browser.send_request(tab, &AgentRequest::GetMetrics, timeout).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Messaging);

        browser.inject_agent(tab).unwrap();
        match browser.send_request(tab, &AgentRequest::GetMetrics, timeout).unwrap() {
            AgentResponse::Metrics(m) => assert_eq!(m.total_height, 100),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn restricted_pages_refuse_injection_and_capture() {
        let browser = SimulatedBrowser::new();
        browser.open(SimulatedPage::new("chrome://settings", 10, 100, 10, 50));
        let tab = TabId(1);
        assert_eq!(browser.inject_agent(tab).unwrap_err().kind(), crate::ErrorKind::Injection);
        assert_eq!(
            browser.capture_visible(WindowId(1)).unwrap_err().kind(),
            crate::ErrorKind::Platform
        );
    }

    #[test]
    fn keepalive_closes_on_drop() {
        let browser = SimulatedBrowser::new();
        let tab = browser.open(SimulatedPage::new("https://example.com/", 10, 100, 10, 50));
        browser.inject_agent(tab).unwrap();
        {
            let _guard = browser.connect_keepalive(tab).unwrap();
            assert_eq!(browser.open_keepalives(), 1);
        }
        assert_eq!(browser.open_keepalives(), 0);
        assert!(browser
            .interactions_with(tab)
            .contains(&Interaction::KeepAliveClosed(tab)));
    }

    #[test]
    fn metrics_timeouts_are_consumed() {
        let browser = SimulatedBrowser::new();
        let tab = browser.open(SimulatedPage::new("https://example.com/", 10, 100, 10, 50));
        browser.set_faults(
            tab,
            Faults {
                agent_preloaded: true,
                metrics_timeouts: 1,
                ..Default::default()
            },
        );
        let timeout = Duration::from_millis(5000);
        let err = browser.send_request(tab, &AgentRequest::GetMetrics, timeout).unwrap_err();
        assert!(matches!(err, Error::Timeout(5000)));
        assert!(browser.send_request(tab, &AgentRequest::GetMetrics, timeout).is_ok());
    }
}
