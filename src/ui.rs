use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stage progress output for the package pipeline. Pretty mode draws an
/// indicatif spinner per stage on stderr, plain mode prints `==> [n/N] name`.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    /// `==> [n/N] stage` lines on stderr and never a spinner, for tests and
    /// library callers.
    pub fn plain() -> Self {
        Self::new(UiMode::Plain, false, true)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    /// Announce stage `step` of `total`. The returned guard reports the
    /// outcome when dropped: success only if `finish` was called.
    pub fn stage(&self, step: usize, total: usize, name: &str) -> StageGuard {
        let label = format!("[{step}/{total}] {name}");
        if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{label}…"));
            StageGuard::new(label, Some(spinner))
        } else {
            eprintln!("==> {}", label);
            StageGuard::new(label, None)
        }
    }
}

pub struct StageGuard {
    label: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    detail: Option<String>,
    finished: bool,
}

impl StageGuard {
    fn new(label: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            label,
            start: Instant::now(),
            spinner,
            detail: None,
            finished: false,
        }
    }

    /// Mark the stage successful, with an optional short summary.
    pub fn finish(mut self, detail: Option<String>) {
        self.detail = detail;
        self.finished = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = format_duration(self.start.elapsed());
        let message = match (self.finished, &self.detail) {
            (true, Some(detail)) => format!("✔ {}: {} ({})", self.label, detail, elapsed),
            (true, None) => format!("✔ {} ({})", self.label, elapsed),
            (false, _) => format!("✘ {} failed ({})", self.label, elapsed),
        };
        match &self.spinner {
            Some(spinner) if self.finished => spinner.finish_with_message(message),
            Some(spinner) => spinner.abandon_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_output_needs_a_tty() {
        assert!(!Ui::from_args(Some("pretty"), false, false).use_pretty());
        assert!(Ui::from_args(Some("pretty"), true, true).use_pretty());
        assert!(!Ui::from_args(None, true, true).use_pretty());
        assert!(!Ui::from_args(Some("plain"), true, false).use_pretty());
    }

    #[test]
    fn plain_never_draws_spinners() {
        let ui = Ui::plain();
        assert!(!ui.is_tty);
        assert!(!ui.use_pretty());
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
