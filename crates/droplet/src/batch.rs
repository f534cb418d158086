use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc::UnboundedSender, Semaphore};
use tokio::task::{JoinError, JoinSet};

use crate::{
    error::{AngleError, MeasurementError, Result},
    io,
    pipeline::ContactAngleEngine,
    types::{AngleResult, Stage},
};

/// Result of measuring one image in a batch
#[derive(Debug)]
pub struct ImageOutcome {
    pub path: PathBuf,
    pub result: std::result::Result<AngleResult, MeasurementError>,
}

impl ImageOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Progress notifications sent while a batch runs
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Started {
        total: usize,
    },
    Completed {
        /// Position of the image in the input list
        index: usize,
        path: PathBuf,
        angle_deg: Option<f64>,
        log_line: String,
    },
    Finished {
        succeeded: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Images measured at the same time
    pub jobs: usize,
    /// Per-image limit; an image that exceeds it is reported as timed out
    /// while its worker runs to completion in the background
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
            timeout: None,
        }
    }
}

/// Measures many images on blocking workers and returns the outcomes in
/// input order.
pub struct BatchRunner {
    engine: Arc<ContactAngleEngine>,
    options: BatchOptions,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl BatchRunner {
    pub fn new(engine: Arc<ContactAngleEngine>, options: BatchOptions) -> Self {
        Self {
            engine,
            options,
            events: None,
        }
    }

    /// Report progress on `sender` while running
    pub fn with_events(mut self, sender: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(sender) = &self.events {
            // A dropped receiver only means nobody is listening
            sender.send(event).ok();
        }
    }

    /// Measure every accepted image directly inside `dir`
    pub async fn run_dir<S: AsRef<str>>(&self, dir: &Path, extensions: &[S]) -> Result<Vec<ImageOutcome>> {
        let paths = io::collect_images(dir, extensions)?;
        tracing::info!(dir = %dir.display(), images = paths.len(), "scanned folder");
        Ok(self.run(paths).await)
    }

    pub async fn run(&self, paths: Vec<PathBuf>) -> Vec<ImageOutcome> {
        let total = paths.len();
        self.emit(BatchEvent::Started { total });

        let semaphore = Arc::new(Semaphore::new(self.options.jobs.max(1)));
        let mut tasks = JoinSet::new();
        for (index, path) in paths.iter().cloned().enumerate() {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.options.timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let name = io::image_name(&path);
                let worker = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || engine.measure(&path)
                });
                let result = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, worker).await {
                        Ok(joined) => flatten(joined, &name),
                        Err(_) => {
                            tracing::warn!(image = %name, ?limit, "measurement timed out");
                            Err(MeasurementError::new(Stage::Batch, name, AngleError::TimedOut(limit)))
                        }
                    },
                    None => flatten(worker.await, &name),
                };
                (index, ImageOutcome { path, result })
            });
        }

        let precision = self.engine.precision() as usize;
        let mut slots: Vec<Option<ImageOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    self.emit(BatchEvent::Completed {
                        index,
                        path: outcome.path.clone(),
                        angle_deg: outcome.result.as_ref().ok().map(|r| r.angle_deg),
                        log_line: outcome.log_line(precision),
                    });
                    slots[index] = Some(outcome);
                }
                Err(err) => tracing::error!(%err, "batch task aborted"),
            }
        }

        let outcomes: Vec<ImageOutcome> = slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    let name = io::image_name(&path);
                    ImageOutcome {
                        result: Err(MeasurementError::new(
                            Stage::Batch,
                            name,
                            AngleError::WorkerFailed("task aborted".to_string()),
                        )),
                        path,
                    }
                })
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        tracing::info!(succeeded, failed, "batch finished");
        self.emit(BatchEvent::Finished { succeeded, failed });
        outcomes
    }
}

fn flatten(
    joined: std::result::Result<std::result::Result<AngleResult, MeasurementError>, JoinError>,
    name: &str,
) -> std::result::Result<AngleResult, MeasurementError> {
    joined.unwrap_or_else(|err| {
        tracing::error!(image = name, %err, "measurement worker failed");
        Err(MeasurementError::new(
            Stage::Batch,
            name,
            AngleError::WorkerFailed(err.to_string()),
        ))
    })
}
