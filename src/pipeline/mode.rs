//! Camera/File mode state machine.

use std::fmt;
use std::mem;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::capture_loop::CaptureLoop;
use super::log::ResultLog;
use super::store::{ResultSnapshot, ResultStore};
use super::worker::{DetectionWorker, DispatchStats};
use crate::capture::{CaptureBackend, CaptureSource, FrameFeed};
use crate::detect::Decoder;
use crate::error::ScanError;
use crate::CaptureConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Camera,
    File,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Camera => f.write_str("Camera"),
            Mode::File => f.write_str("File"),
        }
    }
}

enum ModeState {
    /// Device open, capture loop running and dispatching
    Camera(CaptureLoop),
    /// Device closed, frames come from still images
    File(CaptureSource),
    /// Only observable while a transition is underway
    Switching,
}

/// Owns exactly one mode at a time, plus the components shared by both.
///
/// Every transition ends the current result epoch, so a detection pass that
/// was in flight when the mode changed can never publish.
pub struct ModeController {
    state: ModeState,
    backend: Arc<dyn CaptureBackend>,
    feed: FrameFeed,
    worker: DetectionWorker,
    store: Arc<ResultStore>,
    log: Arc<ResultLog>,
    device_index: usize,
    resolution: (u32, u32),
    period: Duration,
}

impl ModeController {
    /// Starts in File mode with no device open.
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        decoder: Arc<dyn Decoder>,
        config: &CaptureConfig,
    ) -> Result<Self, ScanError> {
        let store = Arc::new(ResultStore::new());
        let log = Arc::new(ResultLog::new());
        let worker = DetectionWorker::spawn(decoder, Arc::clone(&store), Arc::clone(&log))?;
        let feed = FrameFeed::new();

        Ok(Self {
            state: ModeState::File(CaptureSource::new(Arc::clone(&backend), feed.clone())),
            backend,
            feed,
            worker,
            store,
            log,
            device_index: config.device_index,
            resolution: (config.width, config.height),
            period: Duration::from_secs_f64(1.0 / f64::from(config.fps.max(1))),
        })
    }

    pub fn mode(&self) -> Mode {
        match self.state {
            ModeState::Camera(_) => Mode::Camera,
            ModeState::File(_) | ModeState::Switching => Mode::File,
        }
    }

    /// Device that Camera mode opens
    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn frame_feed(&self) -> FrameFeed {
        self.feed.clone()
    }

    pub fn store(&self) -> Arc<ResultStore> {
        Arc::clone(&self.store)
    }

    pub fn log(&self) -> Arc<ResultLog> {
        Arc::clone(&self.log)
    }

    pub fn worker_stats(&self) -> DispatchStats {
        self.worker.stats()
    }

    pub fn decoder_name(&self) -> &str {
        self.worker.decoder_name()
    }

    /// Whether a capture device is held right now.
    pub fn device_open(&self) -> bool {
        match &self.state {
            ModeState::Camera(_) => true,
            ModeState::File(source) => source.is_open(),
            ModeState::Switching => false,
        }
    }

    /// Switch to `mode`. Switching to the current mode is a no-op.
    ///
    /// A failed switch to Camera leaves File mode in place.
    #[instrument(skip(self))]
    pub fn switch_to(&mut self, mode: Mode) -> Result<(), ScanError> {
        if self.mode() == mode {
            return Ok(());
        }
        match mode {
            Mode::Camera => self.enter_camera(),
            Mode::File => {
                self.enter_file();
                Ok(())
            }
        }
    }

    pub fn toggle(&mut self) -> Result<Mode, ScanError> {
        let target = match self.mode() {
            Mode::Camera => Mode::File,
            Mode::File => Mode::Camera,
        };
        self.switch_to(target)?;
        Ok(target)
    }

    fn enter_camera(&mut self) -> Result<(), ScanError> {
        let mut source = match mem::replace(&mut self.state, ModeState::Switching) {
            ModeState::File(source) => source,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let opened = match source.open(self.device_index) {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!("Staying in file mode: {}", e);
                self.state = ModeState::File(source);
                return Err(e);
            }
        };
        if opened != self.resolution {
            source.reconfigure(self.resolution.0, self.resolution.1);
        }

        self.start_capture(source)
    }

    fn start_capture(&mut self, mut source: CaptureSource) -> Result<(), ScanError> {
        let Some(dispatcher) = self.worker.dispatcher() else {
            source.close();
            self.state = ModeState::File(source);
            return Err(ScanError::WorkerStopped);
        };

        let epoch = self.store.clear();
        match CaptureLoop::spawn(source, dispatcher, epoch, self.period) {
            Ok(capture) => {
                self.state = ModeState::Camera(capture);
                info!(device = self.device_index, "Camera mode");
                Ok(())
            }
            Err(e) => {
                // The source went down with the closure; the device is closed
                self.state = ModeState::File(self.fresh_source());
                Err(e)
            }
        }
    }

    fn enter_file(&mut self) {
        let mut source = match mem::replace(&mut self.state, ModeState::Switching) {
            ModeState::Camera(capture) => self.stop_capture(capture),
            other => {
                self.state = other;
                return;
            }
        };
        source.close();
        self.store.clear();
        self.state = ModeState::File(source);
        info!("File mode");
    }

    fn stop_capture(&self, capture: CaptureLoop) -> CaptureSource {
        match capture.stop() {
            Ok(source) => source,
            Err(e) => {
                error!("{}; device released during unwind", e);
                self.fresh_source()
            }
        }
    }

    fn fresh_source(&self) -> CaptureSource {
        CaptureSource::new(Arc::clone(&self.backend), self.feed.clone())
    }

    /// Load a still image and run detection on it synchronously.
    ///
    /// On failure to load, the previous image and results stay current.
    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub fn load_image(&mut self, path: &Path) -> Result<Arc<ResultSnapshot>, ScanError> {
        let actual = self.mode();
        let ModeState::File(source) = &mut self.state else {
            return Err(ScanError::WrongMode {
                expected: Mode::File,
                actual,
            });
        };

        let frame = source.load_image(path)?;
        let epoch = self.store.clear();
        let snapshot = self.worker.run_once(&frame, epoch)?;
        Ok(snapshot.unwrap_or_else(|| self.store.snapshot()))
    }

    /// Replace the detection backend, keeping the current mode.
    ///
    /// The old worker is abandoned like at shutdown. In Camera mode the device
    /// stays open and capture restarts against the new worker; in File mode
    /// the current image is scanned again.
    #[instrument(skip(self, decoder), fields(decoder = decoder.name()))]
    pub fn set_decoder(&mut self, decoder: Arc<dyn Decoder>) -> Result<(), ScanError> {
        let worker = DetectionWorker::spawn(decoder, Arc::clone(&self.store), Arc::clone(&self.log))?;
        mem::replace(&mut self.worker, worker).shutdown();

        match mem::replace(&mut self.state, ModeState::Switching) {
            ModeState::Camera(capture) => {
                let source = self.stop_capture(capture);
                if !source.is_open() {
                    self.store.clear();
                    self.state = ModeState::File(source);
                    return Err(ScanError::CaptureLoopPanicked);
                }
                self.start_capture(source)
            }
            other => {
                self.state = other;
                let epoch = self.store.clear();
                if let Some(frame) = self.feed.latest() {
                    self.worker.run_once(&frame, epoch)?;
                }
                Ok(())
            }
        }
    }

    /// Empty the overlay and the log. A Camera-mode pass in flight may still
    /// publish afterwards.
    pub fn clear_results(&self) {
        self.store.reset();
        self.log.clear();
        info!("Results cleared");
    }

    /// Stop capture, release the device, and abandon any in-flight pass.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        match mem::replace(&mut self.state, ModeState::Switching) {
            ModeState::Camera(capture) => {
                self.stop_capture(capture).close();
            }
            ModeState::File(mut source) => {
                source.close();
            }
            ModeState::Switching => return,
        }
        self.store.clear();
        self.worker.shutdown();
        info!("Pipeline shut down");
    }
}

impl Drop for ModeController {
    fn drop(&mut self) {
        self.teardown();
    }
}
