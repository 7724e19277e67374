use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fullshot::controller::CaptureController;
use fullshot::output::PngExporter;
use fullshot::platform::cdp::CdpBrowser;
use fullshot::store::FileStore;
use fullshot::{is_capturable, partition_capturable, CaptureConfig, CaptureOptions, Viewport};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fullshot", version, about = "Full-page screenshots of web pages")]
struct Cli {
    /// Directory the stitched PNGs are written to
    #[arg(long, global = true, default_value = ".")]
    out_dir: PathBuf,

    /// Browser viewport width in CSS pixels
    #[arg(long, global = true, default_value_t = 1280)]
    width: u32,

    /// Browser viewport height in CSS pixels
    #[arg(long, global = true, default_value_t = 720)]
    height: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture one page
    Capture { url: String },
    /// Capture several pages, one tab each, in order
    Batch {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = CaptureConfig {
        viewport: Viewport {
            width: cli.width,
            height: cli.height,
        },
        ..CaptureConfig::default()
    };
    config.validate()?;

    let browser = CdpBrowser::launch(&config).context("launching headless Chrome")?;
    let store = FileStore::open(cli.out_dir.join(".fullshot"))?;
    let exporter = PngExporter::new(&cli.out_dir)?;
    let controller = CaptureController::new(&browser, store, &exporter, config);

    match cli.command {
        Command::Capture { url } => {
            if !is_capturable(&url) {
                bail!("cannot capture browser internal page {}", url);
            }
            let tab = browser.open(&url).with_context(|| format!("opening {}", url))?;
            let result = controller.capture_full_page(tab, CaptureOptions::default())?;
            if result.is_fallback {
                warn!("{} was captured as a single viewport", url);
            }
        }
        Command::Batch { urls } => {
            let (capturable, refused) = partition_capturable(&urls[..]);
            for url in refused {
                warn!("skipping browser internal page {}", url);
            }
            let mut tabs = Vec::with_capacity(capturable.len());
            for url in capturable {
                match browser.open(url) {
                    Ok(tab) => tabs.push(tab),
                    Err(e) => warn!("skipping {}: {}", url, e),
                }
            }
            let outcome = controller.capture_batch(&tabs)?;
            info!(
                "batch finished: {} captured, {} failed",
                outcome.captures.len(),
                outcome.errors.len()
            );
            if outcome.captures.is_empty() {
                bail!("no page could be captured");
            }
        }
    }

    for path in exporter.written() {
        println!("{}", path.display());
    }
    Ok(())
}
