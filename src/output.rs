//! Output stage: the consumer of finished captures.
//!
//! The controller hands results over explicitly through [`OutputSignal`]
//! once they are persisted. [`PngExporter`] runs the stitcher on each result
//! and writes the page images to a directory.

use crate::stitch::{encode_png, stitch};
use crate::{CaptureResult, Error, Result, TabError};
use chrono::SecondsFormat;
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What the controller tells the output stage when a run finishes
#[derive(Debug, Clone, Copy)]
pub enum OutputSignal<'a> {
    /// A single capture, also stored under the `latest` key
    Capture(&'a CaptureResult),
    /// Every successful capture of a batch run
    Batch(&'a [CaptureResult]),
    /// Every tab of a batch run failed
    Errors(&'a [TabError]),
}

pub trait OutputStage {
    fn present(&self, signal: OutputSignal<'_>) -> Result<()>;
}

impl<T: OutputStage + ?Sized> OutputStage for &T {
    fn present(&self, signal: OutputSignal<'_>) -> Result<()> {
        (**self).present(signal)
    }
}

/// Output stage that ignores every signal
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOutput;

impl OutputStage for NoOutput {
    fn present(&self, _signal: OutputSignal<'_>) -> Result<()> {
        Ok(())
    }
}

/// Stitches results and saves them as PNG files
pub struct PngExporter {
    dir: PathBuf,
    written: Mutex<Vec<PathBuf>>,
}

impl PngExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("Failed to create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            written: Mutex::new(Vec::new()),
        })
    }

    /// Files written so far, in order
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Stitch one result and write it under a name derived from it
    pub fn export(&self, result: &CaptureResult, untitled_prefix: &str) -> Result<PathBuf> {
        let image = stitch(&result.segments, &result.metrics)?;
        let png = encode_png(&image)?;
        let path = unique_path(&self.dir, &file_name(result, untitled_prefix));
        fs::write(&path, png).map_err(|e| Error::Storage(format!("Failed to write {}: {}", path.display(), e)))?;
        info!(
            "saved {}x{} capture of {} to {}",
            image.width(),
            image.height(),
            result.source_url,
            path.display()
        );
        if let Ok(mut written) = self.written.lock() {
            written.push(path.clone());
        }
        Ok(path)
    }
}

impl OutputStage for PngExporter {
    fn present(&self, signal: OutputSignal<'_>) -> Result<()> {
        match signal {
            OutputSignal::Capture(result) => self.export(result, "fullpage").map(|_| ()),
            OutputSignal::Batch(results) => {
                for result in results {
                    self.export(result, "capture")?;
                }
                Ok(())
            }
            OutputSignal::Errors(errors) => {
                for e in errors {
                    error!("tab {} could not be captured: {}", e.tab_id, e.message);
                }
                Ok(())
            }
        }
    }
}

/// `<title>-<millis>.png` with the title reduced to `[A-Za-z0-9_]` and 50
/// characters, or `<prefix>-<YYYY-MM-DD-HH-MM-SS>.png` when untitled.
pub fn file_name(result: &CaptureResult, untitled_prefix: &str) -> String {
    if result.source_title.is_empty() {
        let stamp = result
            .created_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
            .chars()
            .take(19)
            .map(|c| if c == ':' || c == 'T' { '-' } else { c })
            .collect::<String>();
        format!("{}-{}.png", untitled_prefix, stamp)
    } else {
        let title: String = result
            .source_title
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(50)
            .collect();
        format!("{}-{}.png", title, result.created_at.timestamp_millis())
    }
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.trim_end_matches(".png");
    (2..)
        .map(|n| dir.join(format!("{}-{}.png", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PageMetrics, Segment};
    use chrono::{TimeZone, Utc};
    use image::{Rgba, RgbaImage};

    fn result(title: &str) -> CaptureResult {
        let png = encode_png(&RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]))).unwrap();
        CaptureResult {
            metrics: PageMetrics {
                total_width: 4,
                total_height: 5,
                viewport_width: 4,
                viewport_height: 3,
                device_pixel_ratio: 1.0,
                scroll_x: 0.0,
                scroll_y: 0.0,
            },
            segments: vec![
                Segment {
                    image: png.clone(),
                    y_offset: 0,
                },
                Segment { image: png, y_offset: 2 },
            ],
            created_at: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            source_title: title.to_string(),
            source_url: "https://example.com/".to_string(),
            is_fallback: false,
        }
    }

    #[test]
    fn titled_results_use_sanitized_title() {
        let name = file_name(&result("Docs: Getting Started!"), "fullpage");
        assert_eq!(name, "Docs__Getting_Started_-1709993107000.png");
    }

    #[test]
    fn long_titles_are_cut_to_fifty_characters() {
        let name = file_name(&result(&"x".repeat(80)), "fullpage");
        assert_eq!(name, format!("{}-1709993107000.png", "x".repeat(50)));
    }

    #[test]
    fn untitled_results_use_the_timestamp() {
        assert_eq!(file_name(&result(""), "capture"), "capture-2024-03-09-14-05-07.png");
    }

    #[test]
    fn exporter_writes_stitched_pngs_without_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PngExporter::new(dir.path()).unwrap();
        let r = result("Same");
        exporter.present(OutputSignal::Batch(&[r.clone(), r])).unwrap();

        let written = exporter.written();
        assert_eq!(written.len(), 2);
        assert_ne!(written[0], written[1]);
        let img = image::open(&written[1]).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (4, 5));
        assert_eq!(img.get_pixel(0, 4).0, [10, 20, 30, 255]);
    }

    #[test]
    fn error_signal_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let exporter = PngExporter::new(dir.path()).unwrap();
        let errors = vec![TabError::new(crate::TabId(2), &Error::CaptureEmpty)];
        exporter.present(OutputSignal::Errors(&errors)).unwrap();
        assert!(exporter.written().is_empty());
    }
}
