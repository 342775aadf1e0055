//! Deduplicated record of every payload seen since the last clear.

use std::collections::HashSet;
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::debug;

use super::store::ResultSnapshot;
use crate::detect::BarcodeFormat;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub text: String,
    pub format: BarcodeFormat,
    pub first_seen: SystemTime,
}

#[derive(Default)]
struct LogInner {
    seen: HashSet<(String, BarcodeFormat)>,
    entries: Vec<LogEntry>,
    observers: Vec<flume::Sender<LogEntry>>,
}

/// Append-only set of (text, format) keys in first-seen order.
#[derive(Default)]
pub struct ResultLog {
    inner: Mutex<LogInner>,
}

impl ResultLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every detection of `snapshot` not logged yet; returns how many
    /// were new. Observers receive each new entry once.
    pub fn record(&self, snapshot: &ResultSnapshot) -> usize {
        let mut inner = self.inner.lock();
        let mut added = 0;

        for det in &snapshot.detections {
            let key = (det.text.clone(), det.format);
            if !inner.seen.insert(key) {
                continue;
            }
            let entry = LogEntry {
                text: det.text.clone(),
                format: det.format,
                first_seen: det.captured_at,
            };
            // Observers that dropped their receiver are forgotten
            inner.observers.retain(|tx| tx.send(entry.clone()).is_ok());
            inner.entries.push(entry);
            added += 1;
        }

        if added > 0 {
            debug!(added, total = inner.entries.len(), "result log updated");
        }
        added
    }

    /// Receive every entry added from now on.
    pub fn subscribe(&self) -> flume::Receiver<LogEntry> {
        let (tx, rx) = flume::unbounded();
        self.inner.lock().observers.push(tx);
        rx
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget all entries; observers stay subscribed.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.seen.clear();
        inner.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, Point};
    use std::time::Instant;

    fn snapshot(dets: &[(&str, BarcodeFormat)]) -> ResultSnapshot {
        ResultSnapshot {
            epoch: 0,
            pass: 1,
            detections: dets
                .iter()
                .map(|(t, f)| Detection::new(*t, *f, vec![Point::default(); 4]))
                .collect(),
            published_at: Instant::now(),
        }
    }

    #[test]
    fn repeated_passes_log_once() {
        let log = ResultLog::new();
        let snap = snapshot(&[("ABC123", BarcodeFormat::Ean13)]);

        assert_eq!(log.record(&snap), 1);
        for _ in 0..49 {
            assert_eq!(log.record(&snap), 0);
        }

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "ABC123");
        assert_eq!(entries[0].format, BarcodeFormat::Ean13);
    }

    #[test]
    fn key_includes_format() {
        let log = ResultLog::new();
        log.record(&snapshot(&[
            ("ABC123", BarcodeFormat::Ean13),
            ("ABC123", BarcodeFormat::Code128),
            ("ABC123", BarcodeFormat::Ean13),
        ]));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn observers_see_new_entries_only() {
        let log = ResultLog::new();
        let rx = log.subscribe();

        log.record(&snapshot(&[("A", BarcodeFormat::QrCode)]));
        log.record(&snapshot(&[("A", BarcodeFormat::QrCode), ("B", BarcodeFormat::QrCode)]));

        let got: Vec<String> = rx.try_iter().map(|e| e.text).collect();
        assert_eq!(got, vec!["A", "B"]);
    }

    #[test]
    fn dropped_observer_is_pruned() {
        let log = ResultLog::new();
        drop(log.subscribe());
        log.record(&snapshot(&[("A", BarcodeFormat::QrCode)]));
        assert!(log.inner.lock().observers.is_empty());
    }

    #[test]
    fn clear_allows_relogging() {
        let log = ResultLog::new();
        let snap = snapshot(&[("A", BarcodeFormat::UpcA)]);
        log.record(&snap);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.record(&snap), 1);
    }
}
