use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

use super::factory::ModelFactory;
use super::single_flight::SingleFlight;
use super::variant::{selection_plan, ModelVariant, ModelsConfig};
use crate::bounded::run_bounded;
use crate::cancel::CancellationToken;
use crate::detect::{DetectionCapability, DetectorBackend};
use crate::tier::ResourceTier;

/// Upper bound on fetching a single model variant.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Why one variant of the plan was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadAttempt {
    pub variant: String,
    pub reason: String,
}

impl fmt::Display for LoadAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.variant, self.reason)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("no detection model could be loaded ({})", summarize(.attempts))]
    LoadFailed { attempts: Vec<LoadAttempt> },
    #[error("model loading was cancelled")]
    Cancelled,
}

fn summarize(attempts: &[LoadAttempt]) -> String {
    if attempts.is_empty() {
        return "empty selection plan".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ModelError {
    pub fn user_message(&self) -> String {
        match self {
            ModelError::LoadFailed { attempts } => format!(
                "Detection is unavailable: none of {} model(s) could be loaded. Check the model \
                 files and free memory, then retry.",
                attempts.len()
            ),
            ModelError::Cancelled => "Model loading stopped because the counter is shutting down."
                .to_string(),
        }
    }
}

type LoadOutcome = Result<DetectionCapability, ModelError>;

/// Loads the detection capability for a resource tier.
///
/// `load` is single-flighted: callers arriving while a load is running wait for it and
/// share its outcome, so one request never triggers two fetches. Each plan entry is tried
/// once, in order, with its own deadline.
pub struct ModelLoader {
    factory: Arc<dyn ModelFactory>,
    models: ModelsConfig,
    load_timeout: Duration,
    cancel: CancellationToken,
    active: Mutex<Option<DetectionCapability>>,
    flight: SingleFlight<LoadOutcome>,
}

impl ModelLoader {
    pub fn new(factory: Arc<dyn ModelFactory>, models: ModelsConfig) -> Self {
        Self {
            factory,
            models,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            cancel: CancellationToken::new(),
            active: Mutex::new(None),
            flight: SingleFlight::new(),
        }
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    /// Stop between plan entries once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Unload whatever is active and load the best variant `tier` allows.
    pub fn load(&self, tier: ResourceTier) -> Result<DetectionCapability, ModelError> {
        self.flight.run(|| self.load_plan(tier))
    }

    /// Release the active capability. Safe to call with nothing loaded.
    pub fn unload(&self) {
        let previous = self.active().take();
        if let Some(capability) = previous {
            capability.release();
        }
    }

    pub fn current(&self) -> Option<DetectionCapability> {
        self.active().clone()
    }

    fn active(&self) -> MutexGuard<'_, Option<DetectionCapability>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load_plan(&self, tier: ResourceTier) -> LoadOutcome {
        self.unload();

        let plan = selection_plan(tier, &self.models);
        let mut attempts = Vec::with_capacity(plan.len());
        for variant in plan {
            if self.cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            match self.fetch(&variant) {
                Ok(backend) => {
                    let capability = DetectionCapability::new(&variant.name, backend);
                    if let Err(err) = capability.warm_up() {
                        log::warn!("ModelLoader: warm-up of {} failed: {:#}", variant.name, err);
                    }
                    log::info!(
                        "ModelLoader: loaded {} ({}, {}x{}) for {} tier",
                        variant.name,
                        variant.kind,
                        variant.input_size.0,
                        variant.input_size.1,
                        tier
                    );
                    *self.active() = Some(capability.clone());
                    return Ok(capability);
                }
                Err(reason) => {
                    log::warn!("ModelLoader: {} unavailable: {}", variant.name, reason);
                    attempts.push(LoadAttempt {
                        variant: variant.name.clone(),
                        reason,
                    });
                }
            }
        }
        let err = ModelError::LoadFailed { attempts };
        log::error!("ModelLoader: {}", err);
        Err(err)
    }

    fn fetch(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>, String> {
        let factory = self.factory.clone();
        let target = variant.clone();
        let late_name = variant.name.clone();
        let fetched = run_bounded(
            "model-load",
            self.load_timeout,
            move || factory.load(&target),
            move |late: anyhow::Result<Box<dyn DetectorBackend>>| {
                if let Ok(mut backend) = late {
                    log::warn!("ModelLoader: {} finished after timeout; releasing", late_name);
                    backend.release();
                }
            },
        );
        match fetched {
            Ok(Some(Ok(backend))) => Ok(backend),
            Ok(Some(Err(err))) => Err(format!("{:#}", err)),
            Ok(None) => Err(format!("timed out after {:?}", self.load_timeout)),
            Err(err) => Err(format!("{:#}", err)),
        }
    }
}

impl Drop for ModelLoader {
    fn drop(&mut self) {
        self.unload();
    }
}
