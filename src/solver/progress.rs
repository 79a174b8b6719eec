use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// Counts finished samples across rayon workers and logs progress each time another
/// 5% is done, or every 1000 samples.
pub(crate) struct ProgressTracker {
    counter: AtomicUsize,
    total: usize,
    start_time: Instant,
}

impl ProgressTracker {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            total,
            start_time: Instant::now(),
        }
    }

    pub(crate) fn inc(&self) {
        let current = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.crosses_bucket(current) {
            return;
        }
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let remaining = elapsed * (self.total - current) as f64 / current as f64;
        tracing::debug!(
            "sampled {}/{} ({}%) ETA: {}",
            current,
            self.total,
            current * 100 / self.total,
            format_duration(remaining)
        );
    }

    /// Whether finishing sample `current` starts a new 5% bucket.
    fn crosses_bucket(&self, current: usize) -> bool {
        if self.total == 0 || current > self.total {
            return false;
        }
        current % 1000 == 0 || current * 20 / self.total > (current - 1) * 20 / self.total
    }

    pub(crate) fn finish(&self) {
        tracing::debug!(
            "sampling finished in {}",
            format_duration(self.start_time.elapsed().as_secs_f64())
        );
    }
}

fn format_duration(seconds: f64) -> String {
    let total_seconds = seconds as u64;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}
