use crate::imaging::ProgressSink;
use crate::models::CopyProgress;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

const MB: f64 = 1f64 / 1024f64 / 1024f64;

// Log a progress line every this many bytes when no bar is drawn
const LOG_INTERVAL: u64 = 1024 * 1024 * 1024;

const BAR_TEMPLATE: &str = concat!(
    "[{elapsed_precise}] [{wide_bar:.cyan/blue}] ",
    "{bytes}/{total_bytes} {binary_bytes_per_sec} ({eta})"
);

/// Terminal progress bar for an imaging run
pub struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        Self { bar }
    }
}

impl ProgressSink for ProgressBarSink {
    fn update(&mut self, progress: CopyProgress, _total: u64) {
        self.bar.set_position(progress.bytes_copied);
    }

    fn finish(&mut self, progress: CopyProgress, _total: u64) {
        self.bar.set_position(progress.bytes_copied);
        self.bar.finish();
    }
}

/// Progress reported through the log only, roughly once per gigabyte
#[derive(Default)]
pub struct LogProgressSink {
    last_logged: u64,
}

impl ProgressSink for LogProgressSink {
    fn update(&mut self, progress: CopyProgress, total: u64) {
        if progress.bytes_copied.saturating_sub(self.last_logged) < LOG_INTERVAL {
            return;
        }
        self.last_logged = progress.bytes_copied;
        info!(
            "Copied {:.0} MB / {:.0} MB ({:.1}%)",
            progress.bytes_copied as f64 * MB,
            total as f64 * MB,
            progress.fraction(total) * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_sink_throttles() {
        let mut sink = LogProgressSink::default();
        sink.update(CopyProgress { bytes_copied: 1024 }, 4 * LOG_INTERVAL);
        assert_eq!(sink.last_logged, 0);

        sink.update(CopyProgress { bytes_copied: LOG_INTERVAL + 1 }, 4 * LOG_INTERVAL);
        assert_eq!(sink.last_logged, LOG_INTERVAL + 1);

        sink.update(CopyProgress { bytes_copied: LOG_INTERVAL + 2 }, 4 * LOG_INTERVAL);
        assert_eq!(sink.last_logged, LOG_INTERVAL + 1);
    }

    #[test]
    fn test_bar_tracks_position() {
        let mut sink = ProgressBarSink::new(100);
        sink.update(CopyProgress { bytes_copied: 40 }, 100);
        assert_eq!(sink.bar.position(), 40);
        sink.finish(CopyProgress { bytes_copied: 100 }, 100);
        assert!(sink.bar.is_finished());
    }
}
