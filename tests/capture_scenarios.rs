//! Capture runs against the simulated browser

use fullshot::controller::CaptureController;
use fullshot::output::{NoOutput, OutputSignal, OutputStage};
use fullshot::platform::simulated::{page_color, Faults, Interaction, SimulatedBrowser, SimulatedPage, FIXED_BAND_COLOR};
use fullshot::store::{MemoryStore, ResultStore};
use fullshot::{stitch, CaptureConfig, CaptureOptions, ErrorKind, TabId};
use std::collections::HashSet;
use std::sync::Mutex;

/// Remembers every signal it receives
#[derive(Default)]
struct Recorder {
    signals: Mutex<Vec<String>>,
}

impl Recorder {
    fn signals(&self) -> Vec<String> {
        self.signals.lock().unwrap().clone()
    }
}

impl OutputStage for Recorder {
    fn present(&self, signal: OutputSignal<'_>) -> fullshot::Result<()> {
        let entry = match signal {
            OutputSignal::Capture(r) => format!("capture:{}", r.source_url),
            OutputSignal::Batch(rs) => format!("batch:{}", rs.len()),
            OutputSignal::Errors(es) => format!("errors:{}", es.len()),
        };
        self.signals.lock().unwrap().push(entry);
        Ok(())
    }
}

fn article() -> SimulatedPage {
    SimulatedPage::new("https://example.com/article", 320, 1000, 320, 400).with_title("Article")
}

fn controller(browser: &SimulatedBrowser) -> CaptureController<&SimulatedBrowser, MemoryStore, NoOutput> {
    CaptureController::new(browser, MemoryStore::new(), NoOutput, CaptureConfig::immediate())
}

fn offsets(result: &fullshot::CaptureResult) -> Vec<u32> {
    result.segments.iter().map(|s| s.y_offset).collect()
}

fn requests(browser: &SimulatedBrowser, tab: TabId, name: &'static str) -> usize {
    browser
        .interactions_with(tab)
        .iter()
        .filter(|i| **i == Interaction::Request(tab, name))
        .count()
}

#[test]
fn full_page_is_stitched_without_the_fixed_header() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_fixed_header(48));
    let ctl = controller(&browser);

    let result = ctl.capture_full_page(tab, CaptureOptions::default()).unwrap();
    assert!(!result.is_fallback);
    assert_eq!(result.source_title, "Article");
    assert_eq!(result.source_url, "https://example.com/article");
    assert_eq!(offsets(&result), vec![0, 360, 600]);

    let image = stitch::stitch(&result.segments, &result.metrics).unwrap();
    assert_eq!(image.dimensions(), (320, 1000));
    for y in [0, 10, 47, 399, 400, 599, 600, 999] {
        assert_eq!(*image.get_pixel(100, y), page_color(y), "row {}", y);
    }

    let page = browser.page(tab).unwrap();
    assert!(page.fixed_elements_visible());
    assert_eq!(requests(&browser, tab, "RESTORE_FIXED"), 1);
    assert_eq!(ctl.store().latest().unwrap(), Some(result));
}

#[test]
fn scroll_position_is_restored() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_scroll(0.0, 250.0));
    controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert_eq!(browser.page(tab).unwrap().scroll(), (0.0, 250.0));
}

#[test]
fn inner_scroll_containers_are_measured() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_inner_scroll_container());
    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert_eq!(result.metrics.total_height, 1000);
    assert_eq!(offsets(&result), vec![0, 360, 600]);
}

#[test]
fn high_dpi_segments_stitch_to_css_size() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_device_pixel_ratio(2.0));
    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert_eq!(result.metrics.device_pixel_ratio, 2.0);

    let first = image::load_from_memory(&result.segments[0].image).unwrap();
    assert_eq!((first.width(), first.height()), (640, 800));
    let image = stitch::stitch(&result.segments, &result.metrics).unwrap();
    assert_eq!(image.dimensions(), (320, 1000));
}

#[test]
fn restricted_pages_are_refused_without_touching_the_tab() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(SimulatedPage::new("chrome://settings", 320, 1000, 320, 400));

    let err = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    assert!(browser
        .interactions_with(tab)
        .iter()
        .all(|i| !matches!(i, Interaction::Injected(_) | Interaction::Request(..) | Interaction::Captured(_))));
}

#[test]
fn missing_tab_is_not_found() {
    let browser = SimulatedBrowser::new();
    let err = controller(&browser)
        .capture_full_page(TabId(42), CaptureOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn metrics_are_retried_after_reinjection() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    browser.set_faults(
        tab,
        Faults {
            metrics_timeouts: 1,
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert!(!result.is_fallback);
    assert_eq!(requests(&browser, tab, "GET_METRICS"), 2);
    let injections = browser
        .interactions_with(tab)
        .iter()
        .filter(|i| matches!(i, Interaction::Injected(_)))
        .count();
    assert_eq!(injections, 2);
}

#[test]
fn unresponsive_agent_falls_back_to_one_viewport() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_scroll(0.0, 120.0));
    browser.set_faults(
        tab,
        Faults {
            metrics_timeouts: 2,
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert!(result.is_fallback);
    assert_eq!(offsets(&result), vec![0]);
    assert_eq!(result.metrics.total_width, 320);
    assert_eq!(result.metrics.total_height, 400);
    assert_eq!(result.metrics.device_pixel_ratio, 1.0);
    assert_eq!(requests(&browser, tab, "GET_METRICS"), 2);
    assert_eq!(requests(&browser, tab, "SCROLL_TO"), 0);

    let image = stitch::stitch(&result.segments, &result.metrics).unwrap();
    assert_eq!(*image.get_pixel(0, 0), page_color(120));
}

#[test]
fn unresponsive_agent_error_survives_a_failed_fallback() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    browser.set_faults(
        tab,
        Faults {
            metrics_timeouts: 2,
            capture_failures: 1,
            ..Default::default()
        },
    );

    let err = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentUnresponsive);
    assert_eq!(browser.open_keepalives(), 0);
}

#[test]
fn no_segments_means_capture_empty_then_fallback() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    browser.set_faults(
        tab,
        Faults {
            capture_failures: 3,
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert!(result.is_fallback);
    assert_eq!(offsets(&result), vec![0]);
    // The page was restored before the fallback capture
    assert_eq!(requests(&browser, tab, "RESTORE_SCROLL"), 1);

    browser.set_faults(
        tab,
        Faults {
            agent_preloaded: true,
            capture_failures: 4,
            ..Default::default()
        },
    );
    let err = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CaptureEmpty);
}

#[test]
fn a_timed_out_scroll_skips_only_its_segment() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    browser.set_faults(
        tab,
        Faults {
            scroll_timeouts: HashSet::from([360]),
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert!(!result.is_fallback);
    assert_eq!(offsets(&result), vec![0, 600]);
    assert_eq!(requests(&browser, tab, "SCROLL_TO"), 3);
}

#[test]
fn failed_hide_is_cosmetic() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article().with_fixed_header(30));
    browser.set_faults(
        tab,
        Faults {
            hide_timeout: true,
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert_eq!(offsets(&result), vec![0, 360, 600]);
    // Nothing was hidden, so nothing is restored
    assert_eq!(requests(&browser, tab, "RESTORE_FIXED"), 0);

    let image = stitch::stitch(&result.segments, &result.metrics).unwrap();
    assert_eq!(*image.get_pixel(0, 0), FIXED_BAND_COLOR);
    assert_eq!(*image.get_pixel(0, 600), FIXED_BAND_COLOR);
}

#[test]
fn failed_activation_and_injection_are_cosmetic() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    browser.set_faults(
        tab,
        Faults {
            activation_fails: true,
            fail_injection: true,
            agent_preloaded: true,
            ..Default::default()
        },
    );

    let result = controller(&browser)
        .capture_full_page(tab, CaptureOptions::default())
        .unwrap();
    assert!(!result.is_fallback);
    assert_eq!(offsets(&result), vec![0, 360, 600]);
}

#[test]
fn keepalive_is_released_on_every_path() {
    let browser = SimulatedBrowser::new();
    let ctl = controller(&browser);

    let ok = browser.open(article());
    ctl.capture_full_page(ok, CaptureOptions::default()).unwrap();
    assert_eq!(browser.open_keepalives(), 0);
    assert!(browser.interactions_with(ok).contains(&Interaction::KeepAliveClosed(ok)));

    let empty = browser.open(article());
    browser.set_faults(
        empty,
        Faults {
            capture_failures: 10,
            ..Default::default()
        },
    );
    assert!(ctl.capture_full_page(empty, CaptureOptions::default()).is_err());
    assert_eq!(browser.open_keepalives(), 0);
    assert!(browser
        .interactions_with(empty)
        .contains(&Interaction::KeepAliveClosed(empty)));

    let mute = browser.open(article());
    browser.set_faults(
        mute,
        Faults {
            unresponsive: true,
            ..Default::default()
        },
    );
    ctl.capture_full_page(mute, CaptureOptions::default()).unwrap();
    assert_eq!(browser.open_keepalives(), 0);
}

#[test]
fn skipping_the_output_stage_still_persists() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    let recorder = Recorder::default();
    let ctl = CaptureController::new(&browser, MemoryStore::new(), &recorder, CaptureConfig::immediate());

    ctl.capture_full_page(
        tab,
        CaptureOptions {
            skip_output_stage: true,
        },
    )
    .unwrap();
    assert!(recorder.signals().is_empty());
    assert!(ctl.store().latest().unwrap().is_some());

    ctl.capture_full_page(tab, CaptureOptions::default()).unwrap();
    assert_eq!(recorder.signals(), vec!["capture:https://example.com/article"]);
}

#[test]
fn batch_collects_successes_and_errors() {
    let browser = SimulatedBrowser::new();
    let first = browser.open(SimulatedPage::new("https://a.example/", 200, 700, 200, 300));
    let gone = browser.open(SimulatedPage::new("https://b.example/", 200, 700, 200, 300));
    let third = browser.open(SimulatedPage::new("https://c.example/", 200, 500, 200, 300));
    browser.close(gone);

    let recorder = Recorder::default();
    let store = MemoryStore::new();
    let ctl = CaptureController::new(&browser, store.clone(), &recorder, CaptureConfig::immediate());

    let outcome = ctl.capture_batch(&[first, gone, third]).unwrap();
    assert_eq!(outcome.captures.len(), 2);
    assert_eq!(outcome.captures[0].source_url, "https://a.example/");
    assert_eq!(outcome.captures[1].source_url, "https://c.example/");
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].tab_id, gone);
    assert_eq!(outcome.errors[0].kind, "NotFound");

    // One signal for the whole batch, none per tab
    assert_eq!(recorder.signals(), vec!["batch:2"]);
    assert_eq!(store.batch().unwrap(), outcome.captures);
    assert_eq!(store.latest().unwrap().as_ref(), outcome.captures.last());

    // Each tab was captured while it was the active one
    let image = stitch::stitch(&outcome.captures[0].segments, &outcome.captures[0].metrics).unwrap();
    assert_eq!(image.dimensions(), (200, 700));
    assert_eq!(*image.get_pixel(0, 650), page_color(650));
}

#[test]
fn batch_where_every_tab_fails_signals_errors() {
    let browser = SimulatedBrowser::new();
    let internal = browser.open(SimulatedPage::new("chrome://extensions", 200, 700, 200, 300));
    let recorder = Recorder::default();
    let store = MemoryStore::new();
    let ctl = CaptureController::new(&browser, store.clone(), &recorder, CaptureConfig::immediate());

    let outcome = ctl.capture_batch(&[internal, TabId(99)]).unwrap();
    assert!(outcome.captures.is_empty());
    assert_eq!(outcome.errors.len(), 2);
    assert_eq!(outcome.errors[0].kind, "Unsupported");
    assert_eq!(recorder.signals(), vec!["errors:2"]);
    assert!(store.batch().unwrap().is_empty());
    assert!(store.latest().unwrap().is_none());
}

#[test]
fn empty_batch_signals_nothing() {
    let browser = SimulatedBrowser::new();
    let recorder = Recorder::default();
    let ctl = CaptureController::new(&browser, MemoryStore::new(), &recorder, CaptureConfig::immediate());
    let outcome = ctl.capture_batch(&[]).unwrap();
    assert!(outcome.captures.is_empty() && outcome.errors.is_empty());
    assert!(recorder.signals().is_empty());
}

#[test]
fn invalid_config_is_refused_before_any_capture() {
    let browser = SimulatedBrowser::new();
    let tab = browser.open(article());
    let recorder = Recorder::default();
    let config = CaptureConfig {
        overlap_ratio: 2.0,
        ..CaptureConfig::immediate()
    };
    let ctl = CaptureController::new(&browser, MemoryStore::new(), &recorder, config);

    let err = ctl.capture_full_page(tab, CaptureOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let err = ctl.capture_batch(&[tab]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);

    assert!(browser.interactions_with(tab).is_empty());
    assert!(recorder.signals().is_empty());
    assert!(ctl.store().latest().unwrap().is_none());
}
