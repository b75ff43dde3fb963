//! Terminal progress reporting.
//!
//! [`ProgressEnv`] adapts engine messages to an indicatif bar: progress
//! fractions drive the bar position, retry notices surface as log warnings.

use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use blkapply_core::constants::{TOPIC_RETRY_UPDATE, TOPIC_SET_PROGRESS};
use blkapply_core::Env;

/// Bar resolution; progress fractions map onto 0..=SCALE positions.
const SCALE: u64 = 10_000;

pub struct ProgressEnv {
    retry: bool,
    bar: Option<ProgressBar>,
}

impl ProgressEnv {
    pub fn new(retry: bool, show_bar: bool) -> Self {
        let bar = show_bar.then(|| {
            let bar = ProgressBar::new(SCALE);
            if let Ok(style) =
                ProgressStyle::with_template("{bar:40.cyan/blue} {percent:>3}% {msg}")
            {
                bar.set_style(style);
            }
            bar
        });
        Self { retry, bar }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl Env for ProgressEnv {
    fn is_retry(&self) -> bool {
        self.retry
    }

    fn post_message(&self, topic: &str, payload: &str) {
        match topic {
            TOPIC_SET_PROGRESS => {
                if let (Some(bar), Ok(fraction)) = (&self.bar, payload.parse::<f64>()) {
                    let position = (fraction.clamp(0.0, 1.0) * SCALE as f64).round() as u64;
                    bar.set_position(position);
                }
            }
            TOPIC_RETRY_UPDATE => {
                warn!(command = payload, "transient failure, apply can be retried");
            }
            other => {
                warn!(topic = other, payload, "unhandled engine message");
            }
        }
    }
}
