//! Progress UI (spinner) for a capture run.

use std::sync::Arc;
use std::time::Duration;

use capture_core::AcquisitionState;
use capture_core::fetch::{DownloadProgress, ProgressCallback};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spinner mirroring the orchestrator's state and native download progress.
///
/// Disabled UIs use a hidden bar so callers never branch.
pub(crate) struct ProgressUi {
    bar: ProgressBar,
    task: Option<JoinHandle<()>>,
}

impl ProgressUi {
    pub(crate) fn spawn(enabled: bool, mut states: watch::Receiver<AcquisitionState>) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
                task: None,
            };
        }

        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_message("Loading page...");

        let spinner = bar.clone();
        let task = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                spinner.set_message(state_message(&state));
                if state.is_terminal() {
                    break;
                }
            }
        });

        Self {
            bar,
            task: Some(task),
        }
    }

    /// Callback reporting native download progress on the spinner.
    pub(crate) fn download_callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |progress: DownloadProgress| {
            bar.set_message(download_message(progress));
        })
    }

    pub(crate) fn finish(self) {
        if let Some(task) = self.task {
            task.abort();
        }
        self.bar.finish_and_clear();
    }
}

fn state_message(state: &AcquisitionState) -> String {
    match state {
        AcquisitionState::Idle => "Waiting for navigation...".to_string(),
        AcquisitionState::AwaitingSignal => "Inspecting page...".to_string(),
        AcquisitionState::Attempting { attempt } => format!("Looking for PDF (attempt {attempt})..."),
        AcquisitionState::Succeeded { source_url } => format!("Captured from {source_url}"),
        AcquisitionState::Exhausted { attempts, .. } => {
            format!("No PDF found after {attempts} attempts")
        }
        AcquisitionState::Cancelled => "Cancelled".to_string(),
    }
}

fn download_message(progress: DownloadProgress) -> String {
    match progress.expected {
        Some(expected) => format!(
            "Downloading through session: {} / {}",
            HumanBytes(progress.received),
            HumanBytes(expected)
        ),
        None => format!(
            "Downloading through session: {}",
            HumanBytes(progress.received)
        ),
    }
}
