//! Terminal progress for the `motion_pipeline` binary.
//!
//! `pretty` shows an `indicatif` spinner per step on stderr; `plain` prints one line
//! when a step starts and one when it ends. `auto` picks pretty on a terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = match mode {
            UiMode::Pretty => true,
            UiMode::Plain => false,
            UiMode::Auto => is_tty,
        };
        Self { pretty }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Announce a step. The step ends (and reports its duration) when the guard drops.
    pub fn step(&self, name: &str) -> StepGuard {
        if self.pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StepGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StepGuard::new(name.to_string(), None)
        }
    }
}

pub struct StepGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StepGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Update the spinner text. Plain mode stays quiet until the step ends.
    pub fn set_detail(&self, detail: &str) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!("{}: {}", self.name, detail));
        }
    }

    /// Mark the step as failed; the closing line shows a cross instead of a check.
    pub fn fail(&mut self) {
        self.failed = true;
    }
}

impl Drop for StepGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
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
    fn auto_follows_terminal() {
        assert!(Ui::new(UiMode::Auto, true).is_pretty());
        assert!(!Ui::new(UiMode::Auto, false).is_pretty());
        assert!(Ui::new(UiMode::Pretty, false).is_pretty());
        assert!(!Ui::new(UiMode::Plain, true).is_pretty());
    }

    #[test]
    fn format_duration_switches_units() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
