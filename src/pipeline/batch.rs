//! Batch Coordinator: bounded fan-out over independent work units.
//!
//! A fixed pool of workers drains a shared queue; a unit failure is
//! recorded and the rest of the batch keeps going. Nothing here retries:
//! failed units stay ahead of the watermark and are picked up by the next
//! run of the same window.

use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

pub struct BatchCoordinator {
    worker_count: usize,
}

#[derive(Debug)]
pub struct BatchReport<U> {
    pub succeeded: Vec<U>,
    pub failed: Vec<(U, anyhow::Error)>,
    pub elapsed: Duration,
}

impl<U> BatchReport<U> {
    fn empty() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl BatchCoordinator {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// Run `work` over every unit with bounded concurrency and return the
    /// full partition of outcomes. Unit errors never abort the batch.
    pub async fn run<U, F, Fut>(&self, units: Vec<U>, work: F) -> BatchReport<U>
    where
        U: Clone + Display + Send + 'static,
        F: Fn(U) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let started = Instant::now();
        let total = units.len();
        let mut report = BatchReport::empty();
        if total == 0 {
            return report;
        }

        // Preload the queue, then close it so workers drain and exit.
        let (unit_tx, unit_rx) = mpsc::channel::<U>(total);
        let (result_tx, mut result_rx) = mpsc::channel::<(U, Result<()>)>(total);
        for unit in units {
            let _ = unit_tx.send(unit).await;
        }
        drop(unit_tx);

        let shared_rx = Arc::new(Mutex::new(unit_rx));
        let workers = self.worker_count.min(total);
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = shared_rx.clone();
            let tx = result_tx.clone();
            let work = work.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let unit_opt = { rx.lock().await.recv().await };
                    let Some(unit) = unit_opt else {
                        break;
                    };
                    let result = work(unit.clone()).await;
                    if let Err(e) = &result {
                        warn!(worker = i, unit = %unit, error = format!("{e:#}"), "Unit failed");
                    }
                    if tx.send((unit, result)).await.is_err() {
                        break;
                    }
                }
                debug!(worker = i, "Worker drained");
            }));
        }
        drop(result_tx);

        let mut processed = 0usize;
        while let Some((unit, result)) = result_rx.recv().await {
            processed += 1;
            if processed % 10 == 0 {
                info!("⏳ Processed {processed}/{total} units");
            }
            match result {
                Ok(()) => report.succeeded.push(unit),
                Err(e) => report.failed.push((unit, e)),
            }
        }
        for handle in handles {
            let _ = handle.await;
        }

        report.elapsed = started.elapsed();
        report
    }
}
