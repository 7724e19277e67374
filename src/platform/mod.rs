//! Browser control surface consumed by the capture controller.
//!
//! A backend offers tab/window control, agent injection and messaging, the
//! keep-alive channel, and the visible-viewport capture primitive. The
//! capture primitive only ever sees the active tab of a window, which is why
//! the controller keeps re-activating its target.

use crate::agent::{AgentRequest, AgentResponse};
use crate::{Result, TabId, WindowId};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "cdp")]
pub mod cdp;
pub mod simulated;

/// Name of the long-lived channel held open for the duration of a capture
pub const KEEPALIVE_CHANNEL: &str = "capture-keepalive";

/// What a backend reports about a tab
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: String,
    pub title: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Tab/window control, agent messaging and viewport capture
pub trait BrowserControl {
    /// Held while a capture runs; dropping it disconnects the channel.
    type KeepAlive;

    /// Look a tab up; `Ok(None)` when it no longer exists
    fn query_tab(&self, tab: TabId) -> Result<Option<TabInfo>>;

    fn focus_window(&self, window: WindowId) -> Result<()>;

    fn activate_tab(&self, tab: TabId) -> Result<()>;

    /// Make sure the page agent is resident. Injecting twice is harmless.
    fn inject_agent(&self, tab: TabId) -> Result<()>;

    fn connect_keepalive(&self, tab: TabId) -> Result<Self::KeepAlive>;

    /// Send one request to the tab's agent and wait at most `timeout` for
    /// the answer.
    fn send_request(&self, tab: TabId, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse>;

    /// PNG of the visible viewport of the window's active tab
    fn capture_visible(&self, window: WindowId) -> Result<Vec<u8>>;
}

impl<T: BrowserControl + ?Sized> BrowserControl for &T {
    type KeepAlive = T::KeepAlive;

    fn query_tab(&self, tab: TabId) -> Result<Option<TabInfo>> {
        (**self).query_tab(tab)
    }

    fn focus_window(&self, window: WindowId) -> Result<()> {
        (**self).focus_window(window)
    }

    fn activate_tab(&self, tab: TabId) -> Result<()> {
        (**self).activate_tab(tab)
    }

    fn inject_agent(&self, tab: TabId) -> Result<()> {
        (**self).inject_agent(tab)
    }

    fn connect_keepalive(&self, tab: TabId) -> Result<Self::KeepAlive> {
        (**self).connect_keepalive(tab)
    }

    fn send_request(&self, tab: TabId, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse> {
        (**self).send_request(tab, request, timeout)
    }

    fn capture_visible(&self, window: WindowId) -> Result<Vec<u8>> {
        (**self).capture_visible(window)
    }
}

impl<T: BrowserControl + ?Sized> BrowserControl for Arc<T> {
    type KeepAlive = T::KeepAlive;

    fn query_tab(&self, tab: TabId) -> Result<Option<TabInfo>> {
        (**self).query_tab(tab)
    }

    fn focus_window(&self, window: WindowId) -> Result<()> {
        (**self).focus_window(window)
    }

    fn activate_tab(&self, tab: TabId) -> Result<()> {
        (**self).activate_tab(tab)
    }

    fn inject_agent(&self, tab: TabId) -> Result<()> {
        (**self).inject_agent(tab)
    }

    fn connect_keepalive(&self, tab: TabId) -> Result<Self::KeepAlive> {
        (**self).connect_keepalive(tab)
    }

    fn send_request(&self, tab: TabId, request: &AgentRequest, timeout: Duration) -> Result<AgentResponse> {
        (**self).send_request(tab, request, timeout)
    }

    fn capture_visible(&self, window: WindowId) -> Result<Vec<u8>> {
        (**self).capture_visible(window)
    }
}
