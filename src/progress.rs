//! Terminal spinners driven by engine stage callbacks.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rollout::Progress;
use std::sync::Mutex;
use std::time::Duration;

/// One spinner per engine stage.
pub struct SpinnerProgress {
    current: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl SpinnerProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            current: Mutex::new(None),
            hidden: quiet,
        }
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if self.hidden {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        if let Ok(style) =
            ProgressStyle::default_spinner().template("{spinner:.green} {msg} {elapsed:.dim}")
        {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

impl Progress for SpinnerProgress {
    fn on_stage_start(&self, message: &str) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        if let Some(previous) = current.take() {
            previous.finish_and_clear();
        }
        *current = Some(self.spinner(message));
    }

    fn on_stage_complete(&self, message: &str) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        match current.take() {
            Some(pb) => pb.finish_with_message(format!("{} {message}", "✓".green())),
            None if !self.hidden => println!("{} {message}", "✓".green()),
            None => {}
        }
    }

    fn on_note(&self, message: &str) {
        if let Ok(current) = self.current.lock()
            && let Some(pb) = current.as_ref()
        {
            pb.println(format!("  {}", message.dimmed()));
        }
    }
}

impl Drop for SpinnerProgress {
    fn drop(&mut self) {
        if let Ok(mut current) = self.current.lock()
            && let Some(pb) = current.take()
        {
            pb.abandon();
        }
    }
}
