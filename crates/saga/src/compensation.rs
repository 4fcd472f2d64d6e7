//! LIFO stack of undo actions collected while a saga runs.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::activity::{self, ActivityPolicy};
use crate::error::ActivityFailure;

type UndoFuture = Pin<Box<dyn Future<Output = Result<(), ActivityFailure>> + Send>>;
type UndoFn = Box<dyn Fn() -> UndoFuture + Send + Sync>;

/// One undo action and a human-readable description of what it reverts.
pub struct Compensation {
    description: String,
    undo: UndoFn,
}

impl Compensation {
    pub fn new<F, Fut>(description: impl Into<String>, undo: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActivityFailure>> + Send + 'static,
    {
        Self {
            description: description.into(),
            undo: Box::new(move || Box::pin(undo())),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Compensation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compensation")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// What happened while draining a [`CompensationStack`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationReport {
    /// Undo actions that succeeded, in the order they ran.
    pub compensated: Vec<String>,
    /// Undo actions that still failed after their retries.
    pub failed: Vec<String>,
}

impl CompensationReport {
    /// True if every undo action succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Descriptions of everything that ran, failed ones marked as such.
    pub fn summary(&self) -> Vec<String> {
        self.compensated
            .iter()
            .cloned()
            .chain(self.failed.iter().map(|d| format!("{d} (failed)")))
            .collect()
    }
}

/// Undo actions in the order their steps completed.
///
/// [`drain`](Self::drain) runs them newest first. A failing undo is logged
/// and counted, and the drain moves on to the next one.
#[derive(Debug, Default)]
pub struct CompensationStack {
    entries: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the undo for a step that just completed.
    pub fn push(&mut self, compensation: Compensation) {
        tracing::debug!(compensation = %compensation.description, "compensation registered");
        self.entries.push(compensation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptions from oldest to newest.
    pub fn descriptions(&self) -> Vec<&str> {
        self.entries.iter().map(Compensation::description).collect()
    }

    /// Runs every undo action, newest first, each under `policy`.
    ///
    /// Never fails; the outcome of each action is in the report.
    pub async fn drain(&mut self, policy: &ActivityPolicy) -> CompensationReport {
        let mut report = CompensationReport::default();

        while let Some(entry) = self.entries.pop() {
            tracing::info!(compensation = %entry.description, "running compensation");
            let result = activity::invoke("compensation", policy, || (entry.undo)()).await;

            match result {
                Ok(()) => {
                    metrics::counter!("saga_compensations_total", "outcome" => "success")
                        .increment(1);
                    report.compensated.push(entry.description);
                }
                Err(error) => {
                    tracing::error!(
                        compensation = %entry.description,
                        error = %error,
                        "compensation failed"
                    );
                    metrics::counter!("saga_compensations_total", "outcome" => "failure")
                        .increment(1);
                    report.failed.push(entry.description);
                }
            }
        }

        report
    }
}
