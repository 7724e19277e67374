//! Capture controller: drives the page agent through a full-page capture.
//!
//! A run resolves the tab, injects the agent, measures the page, hides fixed
//! UI, scrolls through the [`ScrollPlan`] capturing the visible viewport at
//! each offset, and restores the page. Cosmetic steps (focus, hiding,
//! restoring) and single segments may fail without aborting the run. When
//! the run as a whole fails, a single-viewport fallback capture is attempted
//! before the original error is returned.
//!
//! Requests to the agent are issued one at a time and batch runs are
//! strictly sequential: the capture primitive only sees the active tab of
//! the focused window.

use crate::agent::{AgentRequest, AgentResponse};
use crate::output::{OutputSignal, OutputStage};
use crate::platform::{BrowserControl, TabInfo};
use crate::store::ResultStore;
use crate::{
    is_capturable, BatchOutcome, CaptureConfig, CaptureOptions, CaptureResult, Error, PageMetrics, Result, Segment,
    TabError, TabId,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::time::Duration;

pub mod plan;
pub mod state;

pub use plan::ScrollPlan;
pub use state::{CaptureEvent, CaptureState, InvalidTransition};

/// Orchestrates capture runs against a browser backend
pub struct CaptureController<P, S, O> {
    platform: P,
    store: S,
    output: O,
    config: CaptureConfig,
}

impl<P, S, O> CaptureController<P, S, O>
where
    P: BrowserControl,
    S: ResultStore,
    O: OutputStage,
{
    pub fn new(platform: P, store: S, output: O, config: CaptureConfig) -> Self {
        Self {
            platform,
            store,
            output,
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// Capture the whole page shown in `tab_id`.
    ///
    /// The result is persisted as the latest capture and, unless
    /// `options.skip_output_stage` is set, handed to the output stage.
    ///
    /// Fails with [`Error::ConfigError`] before touching the tab when the
    /// configuration does not validate.
    pub fn capture_full_page(&self, tab_id: TabId, options: CaptureOptions) -> Result<CaptureResult> {
        self.config.validate()?;
        let mut run = Run::new(&self.platform, &self.config, tab_id);
        let mut state = CaptureState::Init;

        while !state.is_terminal() {
            let event = run.perform(state);
            let next = state.next(event).map_err(|e| Error::Other(e.to_string()))?;
            debug!("tab {}: {:?} --{:?}--> {:?}", tab_id, state, event, next);
            state = next;
        }

        let result = match (state, run.result.take()) {
            (CaptureState::Done, Some(result)) => result,
            _ => {
                return Err(run
                    .failure
                    .take()
                    .unwrap_or_else(|| Error::Other(format!("capture of tab {} ended without a result", tab_id))))
            }
        };

        self.store.put_latest(&result)?;
        if !options.skip_output_stage {
            sleep_ms(self.config.output_delay_ms);
            self.output.present(OutputSignal::Capture(&result))?;
        }
        info!(
            "captured tab {} ({} segment(s){})",
            tab_id,
            result.segments.len(),
            if result.is_fallback { ", fallback" } else { "" }
        );
        Ok(result)
    }

    /// Capture each tab in turn, then hand every success to the output
    /// stage at once. One tab failing does not stop the others.
    pub fn capture_batch(&self, tabs: &[TabId]) -> Result<BatchOutcome> {
        self.config.validate()?;
        let mut outcome = BatchOutcome::default();
        let options = CaptureOptions {
            skip_output_stage: true,
        };

        for &tab in tabs {
            match self.capture_full_page(tab, options) {
                Ok(result) => outcome.captures.push(result),
                Err(e) => {
                    error!("Failed to capture tab {}: {}", tab, e);
                    outcome.errors.push(TabError::new(tab, &e));
                }
            }
        }

        if let Some(last) = outcome.captures.last() {
            self.store.put_batch(&outcome.captures)?;
            self.store.put_latest(last)?;
            sleep_ms(self.config.output_delay_ms);
            self.output.present(OutputSignal::Batch(&outcome.captures))?;
        } else if !outcome.errors.is_empty() {
            self.output.present(OutputSignal::Errors(&outcome.errors))?;
        }
        Ok(outcome)
    }
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

/// Per-run working state. Dropping it releases the keep-alive channel.
struct Run<'a, P: BrowserControl> {
    platform: &'a P,
    config: &'a CaptureConfig,
    tab_id: TabId,
    tab: Option<TabInfo>,
    metrics: Option<PageMetrics>,
    plan: Vec<u32>,
    hidden_count: u32,
    segments: Vec<Segment>,
    failure: Option<Error>,
    result: Option<CaptureResult>,
    keepalive: Option<P::KeepAlive>,
}

impl<P: BrowserControl> Drop for Run<'_, P> {
    fn drop(&mut self) {
        if self.keepalive.take().is_some() {
            debug!("tab {}: keep-alive channel released", self.tab_id);
        }
    }
}

impl<'a, P: BrowserControl> Run<'a, P> {
    fn new(platform: &'a P, config: &'a CaptureConfig, tab_id: TabId) -> Self {
        Self {
            platform,
            config,
            tab_id,
            tab: None,
            metrics: None,
            plan: Vec::new(),
            hidden_count: 0,
            segments: Vec::new(),
            failure: None,
            result: None,
            keepalive: None,
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.config.request_timeout_ms)
    }

    fn perform(&mut self, state: CaptureState) -> CaptureEvent {
        match state {
            CaptureState::Init => self.prepare(),
            CaptureState::Measuring { attempt } => self.measure(attempt),
            CaptureState::Hiding => self.hide_and_plan(),
            CaptureState::Scrolling { index, .. } => {
                self.capture_planned(index);
                CaptureEvent::SegmentFinished
            }
            CaptureState::Restoring => self.restore(),
            CaptureState::Fallback => match self.fallback() {
                Ok(result) => {
                    self.result = Some(result);
                    CaptureEvent::FallbackCaptured
                }
                Err(e) => {
                    error!("Fallback capture also failed: {}", e);
                    CaptureEvent::FallbackFailed
                }
            },
            CaptureState::Done | CaptureState::Failed => unreachable!("terminal states are never performed"),
        }
    }

    fn prepare(&mut self) -> CaptureEvent {
        let tab = match self.platform.query_tab(self.tab_id) {
            Ok(Some(tab)) => tab,
            Ok(None) => return self.reject(Error::NotFound(self.tab_id)),
            Err(e) => return self.reject(e),
        };
        if !is_capturable(&tab.url) {
            return self.reject(Error::Unsupported(tab.url));
        }

        if let Err(e) = self.bring_to_front(&tab) {
            warn!("Could not focus/activate tab {}: {}", self.tab_id, e);
        }
        sleep_ms(self.config.activation_delay_ms);

        if let Err(e) = self.platform.inject_agent(self.tab_id) {
            // The agent may already be resident.
            warn!("Agent injection into tab {} failed: {}", self.tab_id, e);
        }
        sleep_ms(self.config.agent_ready_delay_ms);

        match self.platform.connect_keepalive(self.tab_id) {
            Ok(guard) => self.keepalive = Some(guard),
            Err(e) => warn!("Could not open keep-alive channel to tab {}: {}", self.tab_id, e),
        }

        self.tab = Some(tab);
        CaptureEvent::TargetReady
    }

    fn reject(&mut self, err: Error) -> CaptureEvent {
        error!("Full page capture of tab {} failed: {}", self.tab_id, err);
        self.failure = Some(err);
        CaptureEvent::TargetRejected
    }

    fn bring_to_front(&self, tab: &TabInfo) -> Result<()> {
        self.platform.focus_window(tab.window_id)?;
        self.platform.activate_tab(tab.id)
    }

    fn measure(&mut self, attempt: u8) -> CaptureEvent {
        if attempt > 1 {
            if let Err(e) = self.platform.inject_agent(self.tab_id) {
                warn!("Agent re-injection into tab {} failed: {}", self.tab_id, e);
            }
            sleep_ms(self.config.reinject_delay_ms);
        }

        let outcome = self
            .platform
            .send_request(self.tab_id, &AgentRequest::GetMetrics, self.request_timeout())
            .and_then(|response| match response {
                AgentResponse::Metrics(m) if m.viewport_height > 0 => Ok(m),
                AgentResponse::Metrics(_) => Err(Error::Protocol("agent reported an empty viewport".into())),
                other => Err(unexpected("GET_METRICS", other)),
            });

        match outcome {
            Ok(metrics) => {
                debug!("tab {} metrics: {:?}", self.tab_id, metrics);
                self.metrics = Some(metrics);
                CaptureEvent::MetricsReceived
            }
            Err(e) => {
                warn!("Failed to get metrics from tab {} (attempt {}): {}", self.tab_id, attempt, e);
                if attempt >= state::MAX_METRICS_ATTEMPTS {
                    self.failure = Some(Error::AgentUnresponsive(e.to_string()));
                }
                CaptureEvent::MetricsFailed
            }
        }
    }

    fn hide_and_plan(&mut self) -> CaptureEvent {
        match self
            .platform
            .send_request(self.tab_id, &AgentRequest::HideFixed, self.request_timeout())
        {
            Ok(AgentResponse::Hidden { hidden_count }) => self.hidden_count = hidden_count,
            Ok(other) => warn!("{}", unexpected("HIDE_FIXED", other)),
            Err(e) => warn!("Could not hide fixed elements in tab {}: {}", self.tab_id, e),
        }

        if let Some(m) = &self.metrics {
            self.plan = ScrollPlan::new(m.total_height, m.viewport_height, self.config.overlap_ratio).positions;
        }
        debug!("tab {} scroll plan: {:?}", self.tab_id, self.plan);
        CaptureEvent::HideFinished {
            segments: self.plan.len(),
        }
    }

    fn capture_planned(&mut self, index: usize) {
        let Some(&y) = self.plan.get(index) else {
            return;
        };
        match self.capture_segment(y) {
            Ok(segment) => self.segments.push(segment),
            Err(e) => error!("Failed to capture segment at position {}: {}", y, e),
        }
    }

    fn capture_segment(&self, y: u32) -> Result<Segment> {
        let tab = self.tab.as_ref().ok_or(Error::NotFound(self.tab_id))?;

        if let Err(e) = self.bring_to_front(tab) {
            warn!("Re-activation before segment {} failed: {}", y, e);
        }
        sleep_ms(self.config.segment_activation_delay_ms);

        let scroll = AgentRequest::ScrollTo {
            y,
            settle_ms: Some(self.config.settle_ms),
        };
        match self
            .platform
            .send_request(self.tab_id, &scroll, Duration::from_millis(self.config.scroll_timeout_ms))?
        {
            AgentResponse::Ack => {}
            other => return Err(unexpected("SCROLL_TO", other)),
        }
        sleep_ms(self.config.post_scroll_delay_ms);

        let image = self.platform.capture_visible(tab.window_id)?;
        Ok(Segment { image, y_offset: y })
    }

    fn restore(&mut self) -> CaptureEvent {
        if self.hidden_count > 0 {
            if let Err(e) = self.expect_ack(AgentRequest::RestoreFixed) {
                warn!("Could not restore fixed elements in tab {}: {}", self.tab_id, e);
            }
        }

        if let Some(m) = &self.metrics {
            let request = AgentRequest::RestoreScroll {
                x: m.scroll_x,
                y: m.scroll_y,
            };
            if let Err(e) = self.expect_ack(request) {
                warn!("Could not restore scroll position in tab {}: {}", self.tab_id, e);
            }
        }

        let captured = self.segments.len();
        match (captured, self.metrics.take(), self.tab.as_ref()) {
            (0, _, _) | (_, None, _) | (_, _, None) => {
                error!("Full page capture of tab {} failed: {}", self.tab_id, Error::CaptureEmpty);
                self.failure = Some(Error::CaptureEmpty);
                CaptureEvent::Restored { captured: 0 }
            }
            (_, Some(metrics), Some(tab)) => {
                self.result = Some(CaptureResult {
                    metrics,
                    segments: std::mem::take(&mut self.segments),
                    created_at: Utc::now(),
                    source_title: tab.title.clone(),
                    source_url: tab.url.clone(),
                    is_fallback: false,
                });
                CaptureEvent::Restored { captured }
            }
        }
    }

    fn expect_ack(&self, request: AgentRequest) -> Result<()> {
        match self.platform.send_request(self.tab_id, &request, self.request_timeout())? {
            AgentResponse::Ack => Ok(()),
            other => Err(unexpected(request.name(), other)),
        }
    }

    /// Single visible-viewport capture with synthesized metrics
    fn fallback(&self) -> Result<CaptureResult> {
        let tab = self
            .platform
            .query_tab(self.tab_id)?
            .ok_or(Error::NotFound(self.tab_id))?;
        if !is_capturable(&tab.url) {
            return Err(Error::Unsupported(tab.url));
        }

        if let Err(e) = self.bring_to_front(&tab) {
            warn!("Could not focus/activate tab {} for fallback: {}", self.tab_id, e);
        }
        sleep_ms(self.config.segment_activation_delay_ms);

        let image = self.platform.capture_visible(tab.window_id)?;
        let width = tab.width.unwrap_or(self.config.fallback_viewport.width);
        let height = tab.height.unwrap_or(self.config.fallback_viewport.height);
        info!("tab {}: using single-viewport fallback capture", self.tab_id);

        Ok(CaptureResult {
            metrics: PageMetrics {
                total_width: width,
                total_height: height,
                viewport_width: width,
                viewport_height: height,
                device_pixel_ratio: 1.0,
                scroll_x: 0.0,
                scroll_y: 0.0,
            },
            segments: vec![Segment { image, y_offset: 0 }],
            created_at: Utc::now(),
            source_title: tab.title,
            source_url: tab.url,
            is_fallback: true,
        })
    }
}

fn unexpected(request: &str, response: AgentResponse) -> Error {
    match response {
        AgentResponse::Error { message } => Error::Messaging(format!("{} failed in page: {}", request, message)),
        other => Error::Protocol(format!("unexpected response to {}: {:?}", request, other)),
    }
}
