use crossbeam_channel::{bounded, select, tick, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Decay tick for the moving average. The EWMA expects a tick every five
/// seconds to decay properly.
const TICK_INTERVAL: Duration = Duration::from_secs(5);
const TICK_SECS: f64 = 5.0;
const WINDOW_SECS: f64 = 60.0;

/// Counts bytes fed to it via `update` and provides the cumulative `total`
/// and a one minute exponentially weighted moving average `rate` in bytes
/// per second. A private ticker thread decays the average while the counter
/// is open; `close` stops it.
pub struct ByteCounter {
    total: AtomicU64,
    uncounted: AtomicU64,
    ewma: Mutex<Ewma>,
    stop: Mutex<Option<Sender<()>>>,
}

#[derive(Default)]
struct Ewma {
    rate: f64,
    initialized: bool,
}

impl ByteCounter {
    pub fn new() -> Arc<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let counter = Arc::new(ByteCounter {
            total: AtomicU64::new(0),
            uncounted: AtomicU64::new(0),
            ewma: Mutex::new(Ewma::default()),
            stop: Mutex::new(Some(stop_tx)),
        });

        let ticker_counter = Arc::clone(&counter);
        thread::spawn(move || {
            let ticker = tick(TICK_INTERVAL);
            loop {
                select! {
                    recv(ticker) -> _ => ticker_counter.tick(),
                    recv(stop_rx) -> _ => return,
                }
            }
        });

        counter
    }

    pub fn update(&self, bytes: u64) {
        self.total.fetch_add(bytes, Ordering::Relaxed);
        self.uncounted.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Current rate in bytes per second.
    pub fn rate(&self) -> f64 {
        self.ewma.lock().unwrap().rate
    }

    /// Stop the ticker thread. Safe to call more than once.
    pub fn close(&self) {
        self.stop.lock().unwrap().take();
    }

    fn tick(&self) {
        let instant_rate = self.uncounted.swap(0, Ordering::Relaxed) as f64 / TICK_SECS;
        let alpha = 1.0 - (-TICK_SECS / WINDOW_SECS).exp();

        let mut ewma = self.ewma.lock().unwrap();
        if ewma.initialized {
            ewma.rate += alpha * (instant_rate - ewma.rate);
        } else {
            ewma.rate = instant_rate;
            ewma.initialized = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate() {
        let c = ByteCounter::new();
        c.update(100);
        c.update(28);
        assert_eq!(c.total(), 128);
        c.close();
    }

    #[test]
    fn rate_tracks_ticked_updates() {
        let c = ByteCounter::new();
        c.close(); // drive ticks by hand

        c.update(5000);
        c.tick();
        // First tick primes the average directly: 5000 bytes over 5 seconds.
        assert!((c.rate() - 1000.0).abs() < f64::EPSILON);

        // A quiet tick decays the rate towards zero.
        c.tick();
        assert!(c.rate() < 1000.0);
        assert!(c.rate() > 0.0);
    }

    #[test]
    fn close_is_idempotent() {
        let c = ByteCounter::new();
        c.close();
        c.close();
    }
}
