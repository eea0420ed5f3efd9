use std::time::{Duration, Instant};

/// One progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub percent: u8,
    pub uploaded: u64,
    pub total: u64,
    /// Bytes per second.
    pub speed: f64,
    pub speed_text: String,
    pub remaining: Duration,
    pub remaining_text: String,
    pub elapsed: Duration,
}

/// Format a byte rate with 1024-based units.
pub fn format_speed(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    if bytes_per_sec < KB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else if bytes_per_sec < GB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    }
}

/// `1h2m3s`, `2m3s` or `3s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

fn percent(uploaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (uploaded.min(total) as u128 * 100 / total as u128) as u8
}

/// Turns byte counts into [`UploadProgress`] reports.
///
/// The first report averages over the time since the meter started; later
/// ones use the bytes sent since the previous report.
#[derive(Debug)]
pub struct ProgressMeter {
    total: u64,
    started: Instant,
    last: (Instant, u64),
    sampled: bool,
}

impl ProgressMeter {
    /// `already` is what a resumed upload had sent before this run.
    pub fn new(total: u64, already: u64, started: Instant) -> Self {
        Self {
            total,
            started,
            last: (started, already),
            sampled: false,
        }
    }

    pub fn sample(&mut self, uploaded: u64) -> UploadProgress {
        self.sample_at(uploaded, Instant::now())
    }

    pub fn sample_at(&mut self, uploaded: u64, now: Instant) -> UploadProgress {
        let (last_at, last_bytes) = self.last;
        let window = if self.sampled {
            now.saturating_duration_since(last_at)
        } else {
            now.saturating_duration_since(self.started)
        };
        let sent = uploaded.saturating_sub(last_bytes);
        let speed = if window.is_zero() {
            0.0
        } else {
            sent as f64 / window.as_secs_f64()
        };
        let remaining = if speed > 0.0 {
            Duration::from_secs_f64(self.total.saturating_sub(uploaded) as f64 / speed)
        } else {
            Duration::ZERO
        };

        self.last = (now, uploaded);
        self.sampled = true;
        UploadProgress {
            percent: percent(uploaded, self.total),
            uploaded,
            total: self.total,
            speed,
            speed_text: format_speed(speed),
            remaining,
            remaining_text: format_duration(remaining),
            elapsed: now.saturating_duration_since(self.started),
        }
    }

    /// Final 100% report. Carries no speed.
    pub fn complete(&self, speed_text: &str) -> UploadProgress {
        UploadProgress {
            percent: 100,
            uploaded: self.total,
            total: self.total,
            speed: 0.0,
            speed_text: speed_text.to_string(),
            remaining: Duration::ZERO,
            remaining_text: format_duration(Duration::ZERO),
            elapsed: self.started.elapsed(),
        }
    }
}
