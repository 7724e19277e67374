use crate::controller::CaptureController;
use crate::output::OutputStage;
use crate::platform::BrowserControl;
use crate::store::ResultStore;
use crate::{BatchOutcome, CaptureOptions, CaptureResult, Error, Result, TabId};
use log::debug;
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Capture(TabId, CaptureOptions, oneshot::Sender<Result<CaptureResult>>),
    Batch(Vec<TabId>, oneshot::Sender<Result<BatchOutcome>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly capture service backed by a dedicated worker thread.
///
/// The worker thread owns the [`CaptureController`] (and with it the browser
/// backend, which need not be `Send`) and runs one command at a time, so
/// captures requested from concurrent tasks never overlap.
#[derive(Clone)]
pub struct CaptureService {
    cmd_tx: Sender<Command>,
}

impl CaptureService {
    /// Start the worker. `build` runs on the worker thread and creates the
    /// controller it will own.
    pub async fn new<F, P, S, O>(build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<CaptureController<P, S, O>> + Send + 'static,
        P: BrowserControl + 'static,
        S: ResultStore + 'static,
        O: OutputStage + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::spawn(move || {
            let controller = match build() {
                Ok(c) => c,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };
            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Capture(tab, options, resp) => {
                        let _ = resp.send(controller.capture_full_page(tab, options));
                    }
                    Command::Batch(tabs, resp) => {
                        let _ = resp.send(controller.capture_batch(&tabs));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(Ok(()));
                        break;
                    }
                }
            }
            debug!("capture worker stopped");
        });

        init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx })
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::Other("Capture worker has stopped".into()))
    }

    /// Capture one tab ("capture current tab")
    pub async fn capture_tab(&self, tab: TabId) -> Result<CaptureResult> {
        self.capture_tab_with(tab, CaptureOptions::default()).await
    }

    pub async fn capture_tab_with(&self, tab: TabId, options: CaptureOptions) -> Result<CaptureResult> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Capture(tab, options, tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Capture canceled: {}", e)))?
    }

    /// Capture several tabs in order ("capture selected tabs")
    pub async fn capture_batch(&self, tabs: Vec<TabId>) -> Result<BatchOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Batch(tabs, tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Batch capture canceled: {}", e)))?
    }

    /// Stop the worker once queued commands have run.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
