//! Fullshot
//!
//! Full-page screenshots for browser tabs: a controller scrolls the tab in
//! overlapping segments through a small in-page agent, captures each visible
//! viewport, and the stitcher reassembles the segments into one image in page
//! CSS-pixel coordinates.
//!
//! # Features
//!
//! - **CDP Backend** (default): drives a headless Chrome tab through the
//!   `headless_chrome` crate
//! - **Simulated Backend**: deterministic in-process tabs for tests and
//!   offline use
//! - **Best effort**: cosmetic steps never abort a run, and a failed run
//!   falls back to a single-viewport capture
//!
//! # Example
//!
//! ```
//! use fullshot::controller::CaptureController;
//! use fullshot::output::NoOutput;
//! use fullshot::platform::simulated::{SimulatedBrowser, SimulatedPage};
//! use fullshot::store::MemoryStore;
//! use fullshot::{CaptureConfig, CaptureOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let browser = SimulatedBrowser::new();
//! let tab = browser.open(SimulatedPage::new("https://example.com/", 800, 3000, 800, 600));
//!
//! let config = CaptureConfig::immediate();
//! let controller = CaptureController::new(&browser, MemoryStore::new(), NoOutput, config);
//! let result = controller.capture_full_page(tab, CaptureOptions::default())?;
//!
//! let image = fullshot::stitch::stitch(&result.segments, &result.metrics)?;
//! assert_eq!(image.dimensions(), (800, 3000));
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, ErrorKind, Result};

pub mod agent;
pub mod controller;
pub mod output;
pub mod platform;
pub mod stitch;
pub mod store;

// Async-friendly capture API (worker-thread backed)
pub mod async_api;

pub use async_api::CaptureService;

/// URL schemes that belong to the browser itself and can never be captured.
pub const RESTRICTED_SCHEMES: &[&str] = &["chrome", "chrome-extension", "edge", "about"];

/// Whether a tab showing `url` may be captured.
///
/// Browser-internal pages are rejected. Anything that does not parse as a
/// URL (an empty string, for instance) is left to the capture attempt.
pub fn is_capturable(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => !RESTRICTED_SCHEMES.contains(&parsed.scheme()),
        Err(_) => true,
    }
}

/// Split `urls` into the ones that may be captured and the refused ones,
/// keeping the order of each.
pub fn partition_capturable<S: AsRef<str>>(urls: &[S]) -> (Vec<&str>, Vec<&str>) {
    urls.iter()
        .map(|url| AsRef::<str>::as_ref(url))
        .partition(|url| is_capturable(url))
}

/// Identifier of a browser tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a browser window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

/// Configuration for a capture run
///
/// All delays and timeouts are in milliseconds. The defaults match what
/// works on ordinary pages: a 10% overlap between segments, a 300ms settle
/// budget per scroll, and 5s/6s round-trip budgets for agent requests.
///
/// # Examples
///
/// ```
/// let cfg = fullshot::CaptureConfig::default();
/// assert_eq!(cfg.scroll_timeout_ms, 6000);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Fraction of the viewport height shared by consecutive segments
    pub overlap_ratio: f64,
    /// Settle budget passed to the agent with every scroll request
    pub settle_ms: u64,
    /// Budget for metrics, hide and restore requests
    pub request_timeout_ms: u64,
    /// Budget for scroll requests
    pub scroll_timeout_ms: u64,
    /// Pause after focusing/activating the tab at the start of a run
    pub activation_delay_ms: u64,
    /// Pause after re-activating the tab before each segment
    pub segment_activation_delay_ms: u64,
    /// Pause between a scroll acknowledgement and the viewport capture
    pub post_scroll_delay_ms: u64,
    /// Pause after re-injecting the agent before retrying metrics
    pub reinject_delay_ms: u64,
    /// Pause after injection before the first request
    pub agent_ready_delay_ms: u64,
    /// Pause between persisting a result and signalling the output stage
    pub output_delay_ms: u64,
    /// Dimensions assumed for fallback captures when the tab reports none
    pub fallback_viewport: Viewport,
    /// Viewport used when launching a browser backend
    pub viewport: Viewport,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            overlap_ratio: 0.1,
            settle_ms: 300,
            request_timeout_ms: 5000,
            scroll_timeout_ms: 6000,
            activation_delay_ms: 100,
            segment_activation_delay_ms: 50,
            post_scroll_delay_ms: 100,
            reinject_delay_ms: 200,
            agent_ready_delay_ms: 100,
            output_delay_ms: 100,
            fallback_viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            viewport: Viewport::default(),
        }
    }
}

impl CaptureConfig {
    /// Default budgets with every fixed pause removed. Useful against
    /// backends that settle synchronously, such as the simulated browser.
    pub fn immediate() -> Self {
        Self {
            settle_ms: 0,
            activation_delay_ms: 0,
            segment_activation_delay_ms: 0,
            post_scroll_delay_ms: 0,
            reinject_delay_ms: 0,
            agent_ready_delay_ms: 0,
            output_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.overlap_ratio) {
            return Err(Error::ConfigError(format!(
                "overlap_ratio must be in [0, 1), got {}",
                self.overlap_ratio
            )));
        }
        if self.request_timeout_ms == 0 || self.scroll_timeout_ms == 0 {
            return Err(Error::ConfigError("request timeouts must be non-zero".into()));
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(Error::ConfigError("viewport must be non-empty".into()));
        }
        Ok(())
    }
}

/// Viewport dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Document measurements taken by the page agent at the start of a capture.
///
/// Sizes are CSS pixels; captured bitmaps are `device_pixel_ratio` times
/// larger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetrics {
    pub total_width: u32,
    pub total_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_pixel_ratio: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
}

/// One captured viewport slice
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// PNG bytes at device-pixel resolution
    #[serde(with = "base64_bytes")]
    pub image: Vec<u8>,
    /// Page-coordinate top edge in CSS pixels
    pub y_offset: u32,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("image", &format_args!("<{} bytes>", self.image.len()))
            .field("y_offset", &self.y_offset)
            .finish()
    }
}

/// Outcome of one capture run, handed to the output stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResult {
    pub metrics: PageMetrics,
    pub segments: Vec<Segment>,
    pub created_at: DateTime<Utc>,
    pub source_title: String,
    pub source_url: String,
    #[serde(default)]
    pub is_fallback: bool,
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    /// Persist the result but do not signal the output stage
    pub skip_output_stage: bool,
}

/// A tab whose capture failed during a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabError {
    pub tab_id: TabId,
    pub kind: String,
    pub message: String,
}

impl TabError {
    pub fn new(tab_id: TabId, err: &Error) -> Self {
        Self {
            tab_id,
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        }
    }
}

/// Everything a batch run produced
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub captures: Vec<CaptureResult>,
    pub errors: Vec<TabError>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
