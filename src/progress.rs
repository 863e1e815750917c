use std::io::{self, Write};
use std::time::Instant;

use crate::textutil::clip_for_log;

/// Human-facing audit trail on stderr, independent of the `tracing` filter.
pub struct ConsoleProgress {
    enabled: bool,
    max_chars: usize,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool, max_chars: usize) -> Self {
        Self {
            enabled,
            max_chars,
            t0: Instant::now(),
        }
    }

    pub fn silent() -> Self {
        Self::new(false, 0)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {label} {current}/{total} ({pct:5.1}%)");
    }

    /// One `source => translation` line per committed entry.
    pub fn resolved(&self, source: &str, translation: &str, ratio: Option<f32>, via: &str) {
        if !self.enabled {
            return;
        }
        self.info(format_resolved(source, translation, ratio, via, self.max_chars));
    }
}

pub fn format_resolved(
    source: &str,
    translation: &str,
    ratio: Option<f32>,
    via: &str,
    max_chars: usize,
) -> String {
    let src = clip_for_log(source, max_chars);
    let tgt = clip_for_log(translation, max_chars);
    match ratio {
        Some(r) => format!("{src} => {tgt} (sim={r:.2}, {via})"),
        None => format!("{src} => {tgt} ({via})"),
    }
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}
