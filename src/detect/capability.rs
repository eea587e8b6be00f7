use std::fmt;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::backend::{CapabilityKind, DetectorBackend};
use super::result::DetectionResult;

/// Shared handle to the one loaded model.
///
/// Clones refer to the same backend. The model loader owns the canonical handle and
/// replaces it wholesale on reload; once released, every clone refuses to detect.
#[derive(Clone)]
pub struct DetectionCapability {
    variant: Arc<str>,
    kind: CapabilityKind,
    input_size: (u32, u32),
    backend: Arc<Mutex<Option<Box<dyn DetectorBackend>>>>,
}

impl DetectionCapability {
    pub fn new(variant: &str, backend: Box<dyn DetectorBackend>) -> Self {
        Self {
            variant: Arc::from(variant),
            kind: backend.kind(),
            input_size: backend.input_size(),
            backend: Arc::new(Mutex::new(Some(backend))),
        }
    }

    /// Name of the model variant this capability was loaded from.
    pub fn variant(&self) -> &str {
        &self.variant
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    pub fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionResult>> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("capability {} lock poisoned", self.variant))?;
        let backend = guard
            .as_mut()
            .ok_or_else(|| anyhow!("capability {} has been released", self.variant))?;
        backend.detect(image)
    }

    pub fn warm_up(&self) -> Result<()> {
        let mut guard = self
            .backend
            .lock()
            .map_err(|_| anyhow!("capability {} lock poisoned", self.variant))?;
        let backend = guard
            .as_mut()
            .ok_or_else(|| anyhow!("capability {} has been released", self.variant))?;
        backend.warm_up()
    }

    /// Release the backend. Waits for an in-flight detection to finish.
    pub fn release(&self) {
        let taken = match self.backend.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut backend) = taken {
            backend.release();
            log::info!("DetectionCapability: released {}", self.variant);
        }
    }

    pub fn is_released(&self) -> bool {
        match self.backend.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// True when both handles refer to the same loaded backend.
    pub fn same_as(&self, other: &DetectionCapability) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl fmt::Debug for DetectionCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetectionCapability")
            .field("variant", &self.variant)
            .field("kind", &self.kind)
            .field("input_size", &self.input_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubBackend;

    #[test]
    fn released_capability_refuses_to_detect() {
        let capability = DetectionCapability::new(
            "stub",
            Box::new(StubBackend::new(CapabilityKind::FaceDetector).with_people(1)),
        );
        let twin = capability.clone();
        let image = RgbImage::new(32, 32);

        assert_eq!(twin.detect(&image).unwrap().len(), 1);
        capability.release();
        capability.release();

        assert!(twin.is_released());
        assert!(twin.detect(&image).is_err());
        assert!(twin.same_as(&capability));
    }
}
