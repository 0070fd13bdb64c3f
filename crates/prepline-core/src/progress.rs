//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: a records bar per streamed window plus spinner status lines.
//! Non-TTY mode: bars are hidden and only log lines are emitted.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Known-total record bar
fn records_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:<24.dim} {bar:30.green/dim} {human_pos:>9}/{human_len:9} {per_sec:>10} {wide_msg:.dim}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("--")
}

/// Unknown-total record counter
fn counter_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:<24.dim} {human_pos:>9} records {per_sec:>10} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Context with every bar hidden
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Bar counting streamed records for one window.
    ///
    /// `total` is the advertised result count when known.
    pub fn records_bar(&self, label: &str, total: Option<u64>) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = match total {
            Some(n) => {
                let pb = self.multi.add(ProgressBar::new(n));
                pb.set_style(records_style());
                pb
            }
            None => {
                let pb = self.multi.add(ProgressBar::no_length());
                pb.set_style(counter_style());
                pb
            }
        };
        pb.set_prefix(truncate_label(label, 24).to_string());
        pb
    }

    /// Spinner line for a long-running stage; update with `set_message`.
    pub fn stage_line(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {prefix:<10.cyan.bold} {wide_msg}") {
            pb.set_style(style);
        }
        pb.set_prefix(name.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for the log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_label(label: &str, max: usize) -> &str {
    match label.char_indices().nth(max) {
        Some((idx, _)) => &label[..idx],
        None => label,
    }
}

/// Format number with thousand separators.
pub fn fmt_num(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Byte count as B/KB/MB/GB/TB with one decimal above bytes (1024 base).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
