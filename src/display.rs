use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::tracker::{SessionOutcome, SessionView};

const TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// Terminal progress bar for one poll session.
pub struct ProgressDisplay {
    bar: ProgressBar,
}

impl ProgressDisplay {
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(100))
    }

    /// A display that renders nothing; used when stderr is not wanted.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_length(100);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Preparing...");
        Self { bar }
    }

    pub fn update(&self, view: &SessionView) {
        self.bar.set_position(view.display_percent() as u64);

        let mut message = view.stage_label();
        if view.transient_failures > 0 {
            message.push_str(&format!(" (connection trouble, retry {})", view.transient_failures));
        }
        self.bar.set_message(message);
    }

    pub fn finish(&self, outcome: &SessionOutcome) {
        match outcome {
            SessionOutcome::Completed(_) => {
                self.bar.set_position(100);
                self.bar.finish_with_message("Processing complete!");
            }
            SessionOutcome::Failed(failure) => {
                self.bar.abandon_with_message(format!("Processing failed: {}", failure));
            }
            SessionOutcome::TornDown => self.bar.abandon_with_message("Stopped watching"),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn message(&self) -> String {
        self.bar.message()
    }
}

impl Default for ProgressDisplay {
    fn default() -> Self {
        Self::new()
    }
}
