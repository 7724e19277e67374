//! Page agent: the request handler that lives inside the captured document.
//!
//! The controller talks to the agent with the small JSON protocol defined by
//! [`AgentRequest`] and [`AgentResponse`]. [`PageAgent`] implements the
//! handlers over any [`Document`]; the CDP backend injects an equivalent
//! JavaScript agent (see [`script`]) that speaks the same protocol.
//!
//! Apart from the hidden-element table every request is independent.

use crate::{Error, PageMetrics, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod document;
pub mod script;

pub use document::{ComputedStyle, Document, ElementId, ElementInfo, Extent, Overflow, PageEvent, Position};

/// Settle budget used when a scroll request does not carry one
pub const DEFAULT_SETTLE_MS: u64 = 200;

/// Extra wait after every scroll for content loaded by the synthetic events
pub const DYNAMIC_CONTENT_DELAY_MS: u64 = 100;

/// Requests understood by the page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentRequest {
    GetMetrics,
    ScrollTo {
        y: u32,
        #[serde(rename = "settleMs", default, skip_serializing_if = "Option::is_none")]
        settle_ms: Option<u64>,
    },
    HideFixed,
    RestoreFixed,
    RestoreScroll {
        x: f64,
        y: f64,
    },
}

impl AgentRequest {
    /// Wire name of the request, for logs and error messages
    pub fn name(&self) -> &'static str {
        match self {
            AgentRequest::GetMetrics => "GET_METRICS",
            AgentRequest::ScrollTo { .. } => "SCROLL_TO",
            AgentRequest::HideFixed => "HIDE_FIXED",
            AgentRequest::RestoreFixed => "RESTORE_FIXED",
            AgentRequest::RestoreScroll { .. } => "RESTORE_SCROLL",
        }
    }
}

/// Responses sent back by the page agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentResponse {
    Metrics(PageMetrics),
    Hidden {
        #[serde(rename = "hiddenCount")]
        hidden_count: u32,
    },
    Ack,
    /// The agent caught an exception while handling the request
    Error { message: String },
}

/// An element hidden by `HIDE_FIXED` and the inline display it had before
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenElementRecord {
    pub element: ElementId,
    pub original_display: Option<String>,
}

/// The page agent over a concrete document
pub struct PageAgent<D: Document> {
    document: D,
    hidden: Vec<HiddenElementRecord>,
    dynamic_content_delay: Duration,
}

impl<D: Document> PageAgent<D> {
    pub fn new(document: D) -> Self {
        Self {
            document,
            hidden: Vec::new(),
            dynamic_content_delay: Duration::from_millis(DYNAMIC_CONTENT_DELAY_MS),
        }
    }

    pub fn with_dynamic_content_delay(mut self, delay: Duration) -> Self {
        self.dynamic_content_delay = delay;
        self
    }

    pub fn document(&self) -> &D {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.document
    }

    /// Elements currently hidden by this agent
    pub fn hidden(&self) -> &[HiddenElementRecord] {
        &self.hidden
    }

    /// Dispatch one protocol request
    pub fn handle(&mut self, request: &AgentRequest) -> AgentResponse {
        debug!("agent handling {}", request.name());
        match *request {
            AgentRequest::GetMetrics => AgentResponse::Metrics(self.metrics()),
            AgentRequest::ScrollTo { y, settle_ms } => {
                self.scroll_to(y, settle_ms.unwrap_or(DEFAULT_SETTLE_MS));
                AgentResponse::Ack
            }
            AgentRequest::HideFixed => AgentResponse::Hidden {
                hidden_count: self.hide_fixed_elements(),
            },
            AgentRequest::RestoreFixed => {
                self.restore_fixed_elements();
                AgentResponse::Ack
            }
            AgentRequest::RestoreScroll { x, y } => {
                self.document.scroll_to(x, y);
                AgentResponse::Ack
            }
        }
    }

    /// Handle a request given in its wire encoding
    pub fn handle_json(&mut self, request: &str) -> Result<String> {
        let request: AgentRequest = serde_json::from_str(request)
            .map_err(|e| Error::Protocol(format!("Malformed agent request: {}", e)))?;
        let response = self.handle(&request);
        serde_json::to_string(&response)
            .map_err(|e| Error::Protocol(format!("Failed to encode agent response: {}", e)))
    }

    /// Measure the document. The total size is the largest of every
    /// candidate extent so pages that scroll an inner container are not
    /// under-measured.
    pub fn metrics(&self) -> PageMetrics {
        let root = self.document.root_extent();
        let body = self.document.body_extent().unwrap_or_default();
        let (viewport_width, viewport_height) = self.document.viewport_size();
        let (container_width, container_height) = self.scroll_container_extent();

        let total_width = [
            root.scroll_width,
            root.client_width,
            body.scroll_width,
            body.client_width,
            viewport_width,
            container_width,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        let total_height = [
            root.scroll_height,
            root.client_height,
            body.scroll_height,
            body.client_height,
            root.offset_height,
            body.offset_height,
            viewport_height,
            container_height,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);

        let dpr = self.document.device_pixel_ratio();
        let (scroll_x, scroll_y) = self.document.scroll_position();

        PageMetrics {
            total_width,
            total_height,
            viewport_width,
            viewport_height,
            device_pixel_ratio: if dpr > 0.0 && dpr.is_finite() { dpr } else { 1.0 },
            scroll_x,
            scroll_y,
        }
    }

    fn scroll_container_extent(&self) -> (u32, u32) {
        self.document
            .elements()
            .iter()
            .filter(|el| is_scroll_container_candidate(el))
            .filter(|el| el.computed.overflow.scrolls() || el.computed.overflow_y.scrolls())
            .fold((0, 0), |(w, h), el| (w.max(el.scroll_width), h.max(el.scroll_height)))
    }

    /// Scroll, nudge lazy loaders, then wait for the page to settle.
    pub fn scroll_to(&mut self, y: u32, settle_ms: u64) {
        self.document.scroll_to(0.0, f64::from(y));
        self.document.flush_layout();
        self.document.dispatch(PageEvent::Scroll);
        self.document.dispatch(PageEvent::Resize);
        sleep_ms(settle_ms);
        if !self.dynamic_content_delay.is_zero() {
            std::thread::sleep(self.dynamic_content_delay);
        }
    }

    /// Hide every fixed or sticky element not already hidden and return the
    /// size of the hidden set.
    pub fn hide_fixed_elements(&mut self) -> u32 {
        for el in self.document.elements() {
            if !is_fixed_candidate(&el) {
                continue;
            }
            if !matches!(el.computed.position, Position::Fixed | Position::Sticky) {
                continue;
            }
            if self.hidden.iter().any(|r| r.element == el.id) {
                continue;
            }
            let original_display = self.document.inline_display(el.id);
            if self.document.set_inline_display(el.id, Some("none")) {
                self.hidden.push(HiddenElementRecord {
                    element: el.id,
                    original_display,
                });
            }
        }
        debug!("agent hid {} fixed element(s)", self.hidden.len());
        self.hidden.len() as u32
    }

    pub fn restore_fixed_elements(&mut self) {
        for record in self.hidden.drain(..) {
            // Elements removed by the page since hiding are simply dropped.
            self.document
                .set_inline_display(record.element, record.original_display.as_deref());
        }
    }
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

const FIXED_CLASSES: &[&str] = &["fixed", "sticky", "header-fixed", "navbar-fixed"];

const FIXED_STYLE_NEEDLES: &[&str] = &[
    "position: fixed",
    "position:fixed",
    "position: sticky",
    "position:sticky",
];

/// Selectors that make an element a candidate for hiding
fn is_fixed_candidate(el: &ElementInfo) -> bool {
    FIXED_STYLE_NEEDLES.iter().any(|n| el.style_contains(n))
        || FIXED_CLASSES.iter().any(|c| el.has_class(c))
        || ((el.tag == "header" || el.tag == "nav") && el.style_contains("fixed"))
        || el.attr("data-fixed") == Some("true")
        || el.attr("data-sticky") == Some("true")
}

/// Selectors that make an element a candidate auxiliary scroll container
fn is_scroll_container_candidate(el: &ElementInfo) -> bool {
    el.style_contains("overflow")
        || el.has_class("scroll-container")
        || el.has_class("scrollable")
        || el.tag == "main"
        || el.attr("role") == Some("main")
}
