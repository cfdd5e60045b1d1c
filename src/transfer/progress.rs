//! Progress arithmetic and human-readable sizes

use std::time::Duration;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// A download progress sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferProgress {
    /// Bytes written so far
    pub bytes: u64,
    /// Declared total size, 0 when unknown
    pub total: u64,
    /// Completion in percent, always within `[0, 100]`
    pub percent: f64,
    /// Average throughput in MB/s
    pub speed_mbps: f64,
    /// Estimated seconds until completion
    pub eta_secs: u64,
}

impl TransferProgress {
    /// Compute percent, throughput and ETA.
    ///
    /// Elapsed time is floored at one second so the first chunks do not report
    /// absurd speeds. An unknown total yields 0 percent and 0 ETA.
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_relay::transfer::TransferProgress;
    /// use std::time::Duration;
    ///
    /// let p = TransferProgress::compute(512, 1024, Duration::from_secs(2));
    /// assert!((p.percent - 50.0).abs() < f64::EPSILON);
    /// ```
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn compute(bytes: u64, total: u64, elapsed: Duration) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (bytes as f64 * 100.0 / total as f64).min(100.0)
        };

        let seconds = elapsed.as_secs_f64().max(1.0);
        let bytes_per_sec = bytes as f64 / seconds;

        let eta_secs = if total == 0 {
            0
        } else {
            let remaining = total.saturating_sub(bytes) as f64;
            (remaining / bytes_per_sec.max(1.0)) as u64
        };

        Self {
            bytes,
            total,
            percent,
            speed_mbps: bytes_per_sec / BYTES_PER_MIB,
            eta_secs,
        }
    }
}

/// Format a byte count as `512 B`, `1.5 KB`, `10.0 MB`, ...
///
/// # Examples
///
/// ```
/// use oxide_relay::transfer::format_size;
///
/// assert_eq!(format_size(10 * 1024 * 1024), "10.0 MB");
/// ```
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}
