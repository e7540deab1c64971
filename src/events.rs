use serde::{Deserialize, Serialize};

/// Payload of a folder scan progress event.
///
/// `total` is the number of bytes expected to be hashed (always at least 1),
/// `current` the number hashed so far, `rate` a one minute moving average in
/// bytes per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub folder: String,
    pub current: u64,
    pub total: u64,
    pub rate: f64,
}

/// Consumer of scan progress events. The scanner emits events on a timer
/// while files are being hashed; implementations must not block for long as
/// they are called from the emitter thread.
pub trait EventSink: Send + Sync {
    fn scan_progress(&self, event: ProgressEvent);
}
