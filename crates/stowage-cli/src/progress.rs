//! Transfer progress display with progress bars.

use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar fed by engine progress fractions
pub struct TransferBar {
    bar: ProgressBar,
    total_bytes: u64,
}

impl TransferBar {
    /// Create a bar for a transfer of `total_bytes`
    #[must_use]
    pub fn new(total_bytes: u64, label: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        let style = ProgressStyle::default_bar()
            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(label.to_string());

        Self { bar, total_bytes }
    }

    /// Progress callback to hand to the storage service
    #[must_use]
    pub fn callback(&self) -> impl Fn(f32) + Send + Sync + 'static {
        let bar = self.bar.clone();
        let total = self.total_bytes;
        move |fraction| bar.set_position(position(fraction, total))
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

fn position(fraction: f32, total: u64) -> u64 {
    (f64::from(fraction.clamp(0.0, 1.0)) * total as f64).round() as u64
}

/// Format bytes in human-readable format
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}
