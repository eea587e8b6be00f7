//! Detection model loading.
//!
//! - `selection_plan`: the ordered list of model variants to try for a resource tier
//! - `ModelFactory`: turns a variant into a loaded `DetectorBackend`
//! - `ModelLoader`: single-flight, bounded, fallback-driven loading with warm-up
//!
//! Only one capability is ever loaded. A reload unloads the previous capability before
//! fetching the next one.

mod factory;
mod loader;
mod single_flight;
mod variant;

pub use factory::{DefaultModelFactory, ModelFactory};
pub use loader::{LoadAttempt, ModelError, ModelLoader, DEFAULT_LOAD_TIMEOUT};
pub use variant::{selection_plan, ModelVariant, ModelsConfig};
