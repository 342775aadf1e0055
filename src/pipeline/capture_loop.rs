//! Fixed-rate capture thread for Camera mode.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, Sender};
use tracing::{debug, info};

use super::worker::Dispatcher;
use crate::capture::CaptureSource;
use crate::error::ScanError;

/// Runs [`CaptureSource::capture_tick`] every `period` and offers each new
/// frame to the detection worker. Owns the source until stopped.
pub struct CaptureLoop {
    stop: Sender<()>,
    handle: JoinHandle<CaptureSource>,
}

impl CaptureLoop {
    pub fn spawn(
        mut source: CaptureSource,
        dispatcher: Dispatcher,
        epoch: u64,
        period: Duration,
    ) -> Result<Self, ScanError> {
        let (stop, stop_rx) = flume::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "Capture loop started");
                let mut next = Instant::now();
                let mut ticks = 0u64;

                loop {
                    match stop_rx.recv_deadline(next) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // Stop requested or the loop handle was dropped
                        _ => break,
                    }

                    // Missed ticks are skipped, not replayed
                    let now = Instant::now();
                    next += period;
                    if next <= now {
                        next = now + period;
                    }

                    if let Some(frame) = source.capture_tick() {
                        dispatcher.try_dispatch(frame, epoch);
                    }
                    ticks += 1;
                }

                debug!(ticks, "Capture loop stopped");
                source
            })
            .map_err(|source| ScanError::Spawn {
                what: "capture",
                source,
            })?;

        Ok(Self { stop, handle })
    }

    /// Stop ticking and hand the source back. No dispatch happens after this
    /// returns.
    pub fn stop(self) -> Result<CaptureSource, ScanError> {
        let _ = self.stop.send(());
        self.handle.join().map_err(|_| ScanError::CaptureLoopPanicked)
    }
}
