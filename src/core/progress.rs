//! Training progress reporting.
//!
//! Observers only display progress; nothing they do feeds back into training.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::warn;

const TEMPLATE: &str = "[{elapsed_precise}] {msg:<30!} {wide_bar} {pos:<9!}/{len:>9!}";

/// Receives progress from a long-running training stage.
pub trait ProgressObserver: Send + Sync {
    /// A new stage begins; positions run up to `total`.
    fn start(&self, stage: &str, total: u64);

    /// Current position within the stage.
    fn update(&self, position: u64);

    fn finish(&self);
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn start(&self, _stage: &str, _total: u64) {}

    fn update(&self, _position: u64) {}

    fn finish(&self) {}
}

/// Terminal progress bar, one bar per stage.
#[derive(Debug, Default)]
pub struct IndicatifProgress {
    bar: Mutex<Option<ProgressBar>>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn style() -> ProgressStyle {
        match ProgressStyle::default_bar().template(TEMPLATE) {
            Ok(style) => style,
            Err(e) => {
                warn!("Progress template rejected ({e}), using the default bar");
                ProgressStyle::default_bar()
            }
        }
    }
}

impl ProgressObserver for IndicatifProgress {
    fn start(&self, stage: &str, total: u64) {
        let pb = ProgressBar::new(total);
        pb.set_style(Self::style());
        pb.set_message(stage.to_owned());
        pb.enable_steady_tick(Duration::from_secs(1));

        if let Ok(mut bar) = self.bar.lock() {
            if let Some(previous) = bar.replace(pb) {
                previous.finish();
            }
        }
    }

    fn update(&self, position: u64) {
        if let Ok(bar) = self.bar.lock() {
            if let Some(pb) = bar.as_ref() {
                pb.set_position(position);
            }
        }
    }

    fn finish(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(pb) = bar.take() {
                pb.finish();
            }
        }
    }
}
