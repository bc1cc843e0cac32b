//! Migration runner.
//!
//! Executes named migration steps in order. A failing step is logged with its
//! full error chain and recorded in the report; later steps still run.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};

type StepFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Outcome of one migration step.
#[derive(Debug, Clone)]
pub struct StepReport {
    /// Step name
    pub name: String,

    /// Whether the step succeeded
    pub success: bool,

    /// Error chain (if failed)
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Report of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.steps.iter().filter(|step| step.success).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|step| !step.success)
    }

    /// Check if every step succeeded.
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|step| step.success)
    }
}

/// Ordered list of migration steps.
#[derive(Default)]
pub struct MigrationRunner {
    steps: Vec<(String, StepFn)>,
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.steps.iter().map(|(name, _)| name)).finish()
    }
}

impl MigrationRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step.
    #[must_use]
    pub fn step<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.steps.push((name.into(), Box::new(move || f().boxed())));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order.
    pub async fn run(self) -> RunReport {
        let mut report = RunReport::default();

        for (name, step) in self.steps {
            let started_at = Utc::now();
            let start = Instant::now();
            tracing::debug!(step = %name, "Running migration step");

            let result = step().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    tracing::error!(step = %name, error = ?err, "Migration step failed");
                    Some(format!("{:#}", err))
                }
            };

            report.steps.push(StepReport { name, success: error.is_none(), error, started_at, duration_ms });
        }

        report
    }
}
