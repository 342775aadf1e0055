//! Single-flight detection worker.
//!
//! Frames reach the worker over a zero-capacity flume channel. `try_send` on
//! a rendezvous channel only succeeds while the worker thread is parked in
//! `recv`, i.e. idle, so at most one pass is ever in flight and nothing is
//! queued behind it: frames offered during a pass are dropped.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use super::log::ResultLog;
use super::store::{ResultSnapshot, ResultStore};
use crate::capture::Frame;
use crate::detect::Decoder;
use crate::error::{DecodeError, ScanError};

struct Job {
    frame: Arc<Frame>,
    epoch: u64,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicU64,
    dropped: AtomicU64,
    published: AtomicU64,
    discarded: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of the worker counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames accepted for a pass
    pub dispatched: u64,
    /// Frames offered while a pass was in flight
    pub dropped: u64,
    /// Passes whose snapshot replaced the store contents
    pub published: u64,
    /// Completed passes from an epoch that had already ended
    pub discarded: u64,
    /// Passes abandoned on a decode error
    pub failed: u64,
}

struct Shared {
    decoder: Arc<dyn Decoder>,
    store: Arc<ResultStore>,
    log: Arc<ResultLog>,
    counters: CachePadded<Counters>,
}

impl Shared {
    /// One pass: decode, publish, then log. The log is only touched after a
    /// successful publish.
    fn run_pass(&self, frame: &Frame, epoch: u64) -> Result<Option<Arc<ResultSnapshot>>, DecodeError> {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.decoder.detect(frame)))
            .unwrap_or_else(|_| Err(DecodeError::Backend("decoder panicked".into())));
        let elapsed = started.elapsed();
        metrics::histogram!("decode_time_us").record(elapsed.as_micros() as f64);

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(sequence = frame.sequence, "Detection pass abandoned: {}", e);
                return Err(e);
            }
        };

        debug!(
            sequence = frame.sequence,
            found = detections.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Detection pass complete"
        );

        match self.store.publish(epoch, detections) {
            Some(snapshot) => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                self.log.record(&snapshot);
                Ok(Some(snapshot))
            }
            None => {
                self.counters.discarded.fetch_add(1, Ordering::Relaxed);
                debug!(epoch, "Discarding result from a finished epoch");
                Ok(None)
            }
        }
    }
}

/// Cloneable sending side, handed to the capture loop.
#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<Job>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    /// Offer `frame` for detection without blocking. Returns `false` if a
    /// pass is already running (the frame is then display-only).
    pub fn try_dispatch(&self, frame: Arc<Frame>, epoch: u64) -> bool {
        match self.tx.try_send(Job { frame, epoch }) {
            Ok(()) => {
                self.shared.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dispatched").increment(1);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                false
            }
        }
    }
}

/// Owns the detection thread.
pub struct DetectionWorker {
    dispatcher: Option<Dispatcher>,
    shared: Arc<Shared>,
    _thread: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn(
        decoder: Arc<dyn Decoder>,
        store: Arc<ResultStore>,
        log: Arc<ResultLog>,
    ) -> Result<Self, ScanError> {
        let shared = Arc::new(Shared {
            decoder,
            store,
            log,
            counters: CachePadded::new(Counters::default()),
        });
        let (tx, rx) = flume::bounded(0);

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("detector".into())
                .spawn(move || worker_loop(shared, rx))
                .map_err(|source| ScanError::Spawn {
                    what: "detector",
                    source,
                })?
        };

        Ok(Self {
            dispatcher: Some(Dispatcher {
                tx,
                shared: Arc::clone(&shared),
            }),
            shared,
            _thread: Some(thread),
        })
    }

    pub fn decoder_name(&self) -> &str {
        self.shared.decoder.name()
    }

    /// Sending handle, `None` once shut down.
    pub fn dispatcher(&self) -> Option<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn try_dispatch(&self, frame: Arc<Frame>, epoch: u64) -> bool {
        match &self.dispatcher {
            Some(d) => d.try_dispatch(frame, epoch),
            None => false,
        }
    }

    /// Run a pass on the calling thread, bypassing the gate.
    ///
    /// Returns `Ok(None)` if the store moved to a later epoch meanwhile.
    pub fn run_once(&self, frame: &Frame, epoch: u64) -> Result<Option<Arc<ResultSnapshot>>, DecodeError> {
        self.shared.run_pass(frame, epoch)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.shared.counters;
        DispatchStats {
            dispatched: c.dispatched.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            published: c.published.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting frames. A pass still running finishes on its own and
    /// the thread exits; it is not joined. Callers end the store epoch so the
    /// abandoned result is discarded.
    pub fn shutdown(&mut self) {
        if self.dispatcher.take().is_some() {
            info!("Detection worker shutting down");
        }
        self._thread = None;
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<Job>) {
    info!(decoder = shared.decoder.name(), "Detection worker started");

    // Ends once every Dispatcher clone is gone
    while let Ok(job) = rx.recv() {
        let _ = shared.run_pass(&job.frame, job.epoch);
    }

    debug!("Detection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BarcodeFormat, Detection, Point};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Blocks each pass until released; reports whatever `next` holds.
    struct GatedDecoder {
        release: Receiver<()>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        next: Mutex<Result<Vec<Detection>, ()>>,
    }

    impl Decoder for GatedDecoder {
        fn name(&self) -> &str {
            "gated"
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DecodeError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            let _ = self.release.recv();
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.next
                .lock()
                .clone()
                .map_err(|_| DecodeError::Backend("scripted failure".into()))
        }
    }

    struct PanickingDecoder;

    impl Decoder for PanickingDecoder {
        fn name(&self) -> &str {
            "panics"
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DecodeError> {
            panic!("decoder bug");
        }
    }

    fn frame() -> Arc<Frame> {
        Arc::new(Frame::rgb24(2, 2, vec![0; 12]))
    }

    fn det(text: &str) -> Detection {
        Detection::new(text, BarcodeFormat::Ean13, vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)])
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn gated() -> (Arc<GatedDecoder>, Sender<()>) {
        let (tx, rx) = flume::unbounded();
        let decoder = Arc::new(GatedDecoder {
            release: rx,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            next: Mutex::new(Ok(vec![det("A")])),
        });
        (decoder, tx)
    }

    fn spawn(decoder: Arc<dyn Decoder>) -> (DetectionWorker, Arc<ResultStore>, Arc<ResultLog>) {
        let store = Arc::new(ResultStore::new());
        let log = Arc::new(ResultLog::new());
        let worker = DetectionWorker::spawn(decoder, Arc::clone(&store), Arc::clone(&log)).unwrap();
        (worker, store, log)
    }

    #[test]
    fn busy_worker_rejects_without_queueing() {
        let (decoder, release) = gated();
        let (worker, store, log) = spawn(decoder.clone());

        wait_until(|| worker.try_dispatch(frame(), 0));
        wait_until(|| decoder.active.load(Ordering::SeqCst) == 1);
        for _ in 0..10 {
            assert!(!worker.try_dispatch(frame(), 0));
        }

        release.send(()).unwrap();
        wait_until(|| worker.stats().published == 1);
        assert_eq!(store.snapshot().detections[0].text, "A");
        assert_eq!(log.len(), 1);

        // Idle again: the next frame is accepted and nothing was queued
        wait_until(|| worker.try_dispatch(frame(), 0));
        release.send(()).unwrap();
        wait_until(|| worker.stats().published == 2);

        let stats = worker.stats();
        assert_eq!(stats.dispatched, 2);
        assert!(stats.dropped >= 10);
        assert_eq!(decoder.max_active.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_result_clears_previous_snapshot() {
        let (decoder, release) = gated();
        let (worker, store, _log) = spawn(decoder.clone());

        wait_until(|| worker.try_dispatch(frame(), 0));
        release.send(()).unwrap();
        wait_until(|| !store.snapshot().is_empty());

        *decoder.next.lock() = Ok(Vec::new());
        wait_until(|| worker.try_dispatch(frame(), 0));
        release.send(()).unwrap();
        wait_until(|| worker.stats().published == 2);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn decode_error_abandons_pass_and_frees_worker() {
        let (decoder, release) = gated();
        let (worker, store, _log) = spawn(decoder.clone());
        *decoder.next.lock() = Err(());

        wait_until(|| worker.try_dispatch(frame(), 0));
        release.send(()).unwrap();
        wait_until(|| worker.stats().failed == 1);
        assert_eq!(store.snapshot().pass, 0);

        *decoder.next.lock() = Ok(vec![det("B")]);
        wait_until(|| worker.try_dispatch(frame(), 0));
        release.send(()).unwrap();
        wait_until(|| worker.stats().published == 1);
    }

    #[test]
    fn result_from_ended_epoch_is_discarded() {
        let (decoder, release) = gated();
        let (worker, store, log) = spawn(decoder.clone());

        wait_until(|| worker.try_dispatch(frame(), store.epoch()));
        wait_until(|| decoder.active.load(Ordering::SeqCst) == 1);
        store.clear();
        release.send(()).unwrap();

        wait_until(|| worker.stats().discarded == 1);
        assert!(store.snapshot().is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn panicking_decoder_is_a_failed_pass() {
        let (worker, _store, _log) = spawn(Arc::new(PanickingDecoder));

        wait_until(|| worker.try_dispatch(frame(), 0));
        wait_until(|| worker.stats().failed == 1);
        // Worker thread survived
        wait_until(|| worker.try_dispatch(frame(), 0));
        wait_until(|| worker.stats().failed == 2);
    }

    #[test]
    fn run_once_bypasses_gate() {
        let (decoder, release) = gated();
        let (worker, store, log) = spawn(decoder.clone());

        release.send(()).unwrap();
        let snap = worker.run_once(&frame(), store.epoch()).unwrap().unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(worker.stats().dispatched, 0);
    }

    #[test]
    fn shutdown_stops_dispatch() {
        let (decoder, _release) = gated();
        let (mut worker, _store, _log) = spawn(decoder);
        worker.shutdown();
        assert!(!worker.try_dispatch(frame(), 0));
        assert!(worker.dispatcher().is_none());
    }
}
