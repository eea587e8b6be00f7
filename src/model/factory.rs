use anyhow::{anyhow, Context, Result};
use url::Url;

use super::variant::ModelVariant;
use crate::detect::{DetectorBackend, StubBackend};

/// Fetches and instantiates a model variant.
///
/// Loading may block for a long time (weights on slow storage); the model loader bounds
/// each call.
pub trait ModelFactory: Send + Sync {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>>;
}

/// `stub://` sources go to the stub backend; anything else is an ONNX file for tract.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultModelFactory;

impl ModelFactory for DefaultModelFactory {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        if variant.source.starts_with("stub://") {
            let url = Url::parse(&variant.source)
                .with_context(|| format!("invalid stub source {}", variant.source))?;
            let (width, height) = variant.input_size;
            let backend =
                StubBackend::from_url(variant.kind, &url)?.with_input_size(width, height);
            return Ok(Box::new(backend));
        }
        load_model_file(variant)
    }
}

#[cfg(feature = "backend-tract")]
fn load_model_file(variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
    use crate::detect::TractBackend;

    let path = std::path::Path::new(&variant.source);
    if !path.is_file() {
        return Err(anyhow!("model file {} not found", path.display()));
    }
    let (width, height) = variant.input_size;
    let backend = TractBackend::new(path, variant.kind, width, height)?
        .with_thresholds(variant.score_threshold, variant.iou_threshold);
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_model_file(variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "{} requires the backend-tract feature to load {}",
        variant.name,
        variant.source
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{selection_plan, ModelsConfig};
    use crate::tier::ResourceTier;

    #[test]
    fn stub_sources_load_with_variant_input_size() -> Result<()> {
        let plan = selection_plan(ResourceTier::Constrained, &ModelsConfig::stub(2));
        let backend = DefaultModelFactory.load(&plan[0])?;
        assert_eq!(backend.name(), "stub");
        assert_eq!(backend.input_size(), (128, 96));
        Ok(())
    }

    #[test]
    fn missing_model_file_is_an_error() {
        let plan = selection_plan(ResourceTier::Constrained, &ModelsConfig::default());
        assert!(DefaultModelFactory.load(&plan[0]).is_err());
    }
}
