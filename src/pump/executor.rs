use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Deserialize;

use super::gate::GateGuard;
use crate::detect::{DetectionCapability, DetectionResult};

/// Where detection jobs run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Inside the tick that started it; results apply in the same tick.
    #[default]
    Inline,
    /// On one dedicated detection thread; results are collected by later ticks.
    Worker,
}

pub(crate) struct DetectionJob {
    pub capability: DetectionCapability,
    pub frame: RgbImage,
    pub guard: GateGuard,
}

pub(crate) struct DetectionOutcome {
    pub result: Result<Vec<DetectionResult>>,
    pub elapsed: Duration,
    /// Dimensions of the image the detector saw.
    pub input_size: (u32, u32),
    /// Held until the pump has applied the outcome.
    pub guard: GateGuard,
}

/// Run one job. A panicking detector becomes a failed detection.
fn run_job(job: DetectionJob) -> DetectionOutcome {
    let DetectionJob {
        capability,
        frame,
        guard,
    } = job;
    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| capability.detect(&frame)))
        .unwrap_or_else(|_| Err(anyhow!("detector {} panicked", capability.variant())));
    DetectionOutcome {
        result,
        elapsed: started.elapsed(),
        input_size: frame.dimensions(),
        guard,
    }
}

pub(crate) enum DetectionExecutor {
    Inline { finished: Option<DetectionOutcome> },
    Worker(Worker),
}

pub(crate) struct Worker {
    jobs: Option<mpsc::Sender<DetectionJob>>,
    outcomes: mpsc::Receiver<DetectionOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionExecutor {
    pub fn new(mode: ExecutionMode) -> Result<Self> {
        match mode {
            ExecutionMode::Inline => Ok(Self::inline()),
            ExecutionMode::Worker => Ok(Self::Worker(Worker::spawn()?)),
        }
    }

    pub fn inline() -> Self {
        Self::Inline { finished: None }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Inline { .. } => ExecutionMode::Inline,
            Self::Worker(_) => ExecutionMode::Worker,
        }
    }

    /// Hand a job over. A dead worker degrades the executor to inline execution.
    pub fn submit(&mut self, job: DetectionJob) {
        match self {
            Self::Inline { finished } => *finished = Some(run_job(job)),
            Self::Worker(worker) => {
                if let Err(job) = worker.send(job) {
                    log::warn!("FramePump: detection worker is gone; running detection inline");
                    worker.shutdown();
                    *self = Self::Inline {
                        finished: Some(run_job(job)),
                    };
                }
            }
        }
    }

    /// Take a finished outcome, if any. Never blocks.
    pub fn collect(&mut self) -> Option<DetectionOutcome> {
        match self {
            Self::Inline { finished } => finished.take(),
            Self::Worker(worker) => worker.outcomes.try_recv().ok(),
        }
    }

    /// Stop the worker thread, waiting for an in-flight job to finish.
    pub fn shutdown(&mut self) {
        match self {
            Self::Inline { finished } => *finished = None,
            Self::Worker(worker) => worker.shutdown(),
        }
    }
}

impl Worker {
    fn spawn() -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<DetectionJob>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<DetectionOutcome>();
        let handle = thread::Builder::new()
            .name("detection".to_string())
            .spawn(move || {
                for job in job_rx {
                    if outcome_tx.send(run_job(job)).is_err() {
                        break;
                    }
                }
            })
            .context("spawn detection worker")?;
        Ok(Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            handle: Some(handle),
        })
    }

    fn send(&self, job: DetectionJob) -> std::result::Result<(), DetectionJob> {
        match &self.jobs {
            Some(jobs) => jobs.send(job).map_err(|mpsc::SendError(job)| job),
            None => Err(job),
        }
    }

    fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("FramePump: detection worker panicked");
            }
        }
        // Drop undelivered outcomes so their gate guards are released.
        while self.outcomes.try_recv().is_ok() {}
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
