use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One-shot, cloneable stop flag whose waits can be interrupted.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter. Idempotent.
    pub fn stop(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock() = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep until `deadline` or until the signal is raised.
    /// Returns `true` if the signal was raised.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let (flag, condvar) = &*self.inner;
        let mut stopped = flag.lock();
        while !*stopped {
            if condvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.wait_until(Instant::now() + timeout)
    }
}

/// Fixed-rate ticker scheduled on absolute deadlines.
///
/// A late tick does not pull later ticks forward: when the caller falls more
/// than a full period behind, the schedule restarts from now.
pub struct Pacer {
    period: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(period_for_fps(fps))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Block until the next tick. Returns `false` once `stop` is raised.
    pub fn wait(&mut self, stop: &StopSignal) -> bool {
        if stop.wait_until(self.next) {
            return false;
        }
        let now = Instant::now();
        self.next += self.period;
        if self.next + self.period < now {
            self.next = now + self.period;
        }
        true
    }
}

pub fn period_for_fps(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

/// Counts events and reports the rate once per window.
pub struct RateMeter {
    window: Duration,
    window_start: Instant,
    count: u32,
    rate: f64,
}

impl RateMeter {
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            window_start: Instant::now(),
            count: 0,
            rate: 0.0,
        }
    }

    /// Record one event. Returns the new rate when a window closes.
    pub fn tick(&mut self) -> Option<f64> {
        self.count += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < self.window {
            return None;
        }
        self.rate = self.count as f64 / elapsed.as_secs_f64();
        self.count = 0;
        self.window_start = Instant::now();
        Some(self.rate)
    }

    /// Rate measured over the last closed window.
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_period_for_fps() {
        assert_eq!(period_for_fps(30).as_micros(), 33_333);
        assert_eq!(period_for_fps(24).as_micros(), 41_666);
        assert_eq!(period_for_fps(0), Duration::from_secs(1));
    }

    #[test]
    fn test_pacer_holds_rate() {
        let stop = StopSignal::new();
        let mut pacer = Pacer::from_fps(30);
        let start = Instant::now();
        let mut ticks = 0;
        while start.elapsed() < Duration::from_secs(1) {
            assert!(pacer.wait(&stop));
            ticks += 1;
        }
        assert!((26..=33).contains(&ticks), "ticks = {}", ticks);
    }

    #[test]
    fn test_pacer_does_not_burst_after_stall() {
        let stop = StopSignal::new();
        let mut pacer = Pacer::new(Duration::from_millis(10));
        thread::sleep(Duration::from_millis(100));
        assert!(pacer.wait(&stop));
        let start = Instant::now();
        assert!(pacer.wait(&stop));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let stop = StopSignal::new();
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.stop();
        });
        let start = Instant::now();
        assert!(!pacer.wait(&stop));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
        assert!(stop.is_stopped());
    }

    #[test]
    fn test_wait_timeout_without_stop() {
        let stop = StopSignal::new();
        assert!(!stop.wait_timeout(Duration::from_millis(5)));
        stop.stop();
        assert!(stop.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_rate_meter_window() {
        let mut meter = RateMeter::with_window(Duration::from_millis(50));
        assert_eq!(meter.tick(), None);
        thread::sleep(Duration::from_millis(60));
        let rate = meter.tick().unwrap();
        assert!(rate > 0.0);
        assert_eq!(meter.rate(), rate);
    }
}
