//! At-most-once delivery of the captured document.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::session::SourceKind;

/// The terminal value of a successful acquisition.
#[derive(Clone, PartialEq, Eq)]
pub struct CaptureResult {
    /// Validated PDF bytes.
    pub bytes: Vec<u8>,
    /// Filename the host should offer when saving.
    pub suggested_filename: String,
    /// URL the bytes came from.
    pub source_url: String,
    /// How that URL was discovered.
    pub source_kind: SourceKind,
}

impl fmt::Debug for CaptureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureResult")
            .field("bytes", &self.bytes.len())
            .field("suggested_filename", &self.suggested_filename)
            .field("source_url", &self.source_url)
            .field("source_kind", &self.source_kind)
            .finish()
    }
}

type CaptureCallback = Box<dyn FnOnce(CaptureResult) + Send>;

/// Wraps the host's `on_captured` callback so it fires at most once.
///
/// The delivered flag is claimed with a compare-and-swap before the callback
/// runs; every later delivery is discarded and logged.
pub struct CaptureSink {
    delivered: AtomicBool,
    callback: Mutex<Option<CaptureCallback>>,
}

impl fmt::Debug for CaptureSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSink")
            .field("delivered", &self.is_delivered())
            .finish_non_exhaustive()
    }
}

impl CaptureSink {
    /// Creates a sink around `on_captured`.
    pub fn new(on_captured: impl FnOnce(CaptureResult) + Send + 'static) -> Self {
        Self {
            delivered: AtomicBool::new(false),
            callback: Mutex::new(Some(Box::new(on_captured))),
        }
    }

    /// Delivers `result` unless a capture was already delivered.
    ///
    /// Returns true when this call delivered.
    pub fn deliver(&self, result: CaptureResult) -> bool {
        if self
            .delivered
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                source_url = %result.source_url,
                "duplicate capture discarded"
            );
            return false;
        }

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        info!(
            source_url = %result.source_url,
            source_kind = ?result.source_kind,
            bytes = result.bytes.len(),
            filename = %result.suggested_filename,
            "captured PDF"
        );
        if let Some(callback) = callback {
            callback(result);
        }
        true
    }

    /// True once a capture has been delivered.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn result(url: &str) -> CaptureResult {
        CaptureResult {
            bytes: b"%PDF-1.4".to_vec(),
            suggested_filename: "paper.pdf".to_string(),
            source_url: url.to_string(),
            source_kind: SourceKind::Primary,
        }
    }

    #[test]
    fn test_second_delivery_is_discarded() {
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let sink = CaptureSink::new(move |r| sink_received.lock().unwrap().push(r.source_url));

        assert!(!sink.is_delivered());
        assert!(sink.deliver(result("https://a.org/1.pdf")));
        assert!(sink.is_delivered());
        assert!(!sink.deliver(result("https://a.org/2.pdf")));

        assert_eq!(*received.lock().unwrap(), ["https://a.org/1.pdf"]);
    }

    #[test]
    fn test_concurrent_deliveries_invoke_callback_once() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invocations);
        let sink = CaptureSink::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let successes = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let sink = &sink;
                let successes = &successes;
                scope.spawn(move || {
                    if sink.deliver(result(&format!("https://a.org/{i}.pdf"))) {
                        successes.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug_hides_bytes() {
        let debug = format!("{:?}", result("https://a.org/x.pdf"));
        assert!(debug.contains("bytes: 8"), "{debug}");
    }
}
