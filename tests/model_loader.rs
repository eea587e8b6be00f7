use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use occupancy_counter::detect::StubBackend;
use occupancy_counter::{
    CapabilityKind, DefaultModelFactory, DetectorBackend, ModelError, ModelFactory, ModelLoader,
    ModelVariant, ModelsConfig, ResourceTier,
};

/// Records every fetch and fails the variants named in `refuse`.
struct ScriptedFactory {
    refuse: Vec<&'static str>,
    delay: Duration,
    fetched: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl ScriptedFactory {
    fn new(refuse: &[&'static str]) -> Self {
        Self {
            refuse: refuse.to_vec(),
            delay: Duration::ZERO,
            fetched: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl ModelFactory for ScriptedFactory {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(variant.name.clone());
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.refuse.contains(&variant.name.as_str()) {
            return Err(anyhow!("{} is not available on this device", variant.name));
        }
        DefaultModelFactory.load(variant)
    }
}

#[test]
fn falls_back_in_order_trying_each_variant_once() {
    let factory = Arc::new(ScriptedFactory::new(&["object-detector", "object-detector-lite"]));
    let loader = ModelLoader::new(factory.clone(), ModelsConfig::stub(1));

    let capability = loader.load(ResourceTier::Standard).unwrap();

    assert_eq!(capability.variant(), "classifier");
    assert_eq!(capability.kind(), CapabilityKind::Classifier);
    assert_eq!(
        factory.fetched(),
        vec!["object-detector", "object-detector-lite", "classifier"]
    );
}

#[test]
fn emergency_face_detector_is_the_last_resort() {
    let factory = Arc::new(ScriptedFactory::new(&[
        "object-detector",
        "object-detector-lite",
        "classifier",
    ]));
    let loader = ModelLoader::new(factory.clone(), ModelsConfig::stub(1));

    let capability = loader.load(ResourceTier::Standard).unwrap();

    assert_eq!(capability.variant(), "face-detector");
    assert_eq!(capability.kind(), CapabilityKind::FaceDetector);
    assert_eq!(
        factory.fetched(),
        vec![
            "object-detector",
            "object-detector-lite",
            "classifier",
            "face-detector"
        ]
    );
    assert!(loader.current().unwrap().same_as(&capability));
}

#[test]
fn concurrent_loads_share_one_fetch() {
    let factory =
        Arc::new(ScriptedFactory::new(&[]).with_delay(Duration::from_millis(300)));
    let loader = Arc::new(ModelLoader::new(factory.clone(), ModelsConfig::stub(1)));

    let leader = {
        let loader = loader.clone();
        thread::spawn(move || loader.load(ResourceTier::Constrained))
    };
    while factory.fetches.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    let followers: Vec<_> = (0..3)
        .map(|_| {
            let loader = loader.clone();
            thread::spawn(move || loader.load(ResourceTier::Constrained))
        })
        .collect();

    let first = leader.join().unwrap().unwrap();
    for follower in followers {
        let shared = follower.join().unwrap().unwrap();
        assert!(shared.same_as(&first));
    }
    assert_eq!(factory.fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn exhausted_plan_lists_every_attempt() {
    let factory = Arc::new(ScriptedFactory::new(&[
        "object-detector",
        "object-detector-lite",
        "classifier",
        "face-detector",
    ]));
    let loader = ModelLoader::new(factory, ModelsConfig::stub(1));

    match loader.load(ResourceTier::Standard).unwrap_err() {
        ModelError::LoadFailed { attempts } => {
            let names: Vec<&str> = attempts.iter().map(|a| a.variant.as_str()).collect();
            assert_eq!(
                names,
                ["object-detector", "object-detector-lite", "classifier", "face-detector"]
            );
            assert!(attempts.iter().all(|a| a.reason.contains("not available")));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(loader.current().is_none());
}

struct WarmUpFails;

impl ModelFactory for WarmUpFails {
    fn load(&self, variant: &ModelVariant) -> Result<Box<dyn DetectorBackend>> {
        Ok(Box::new(
            StubBackend::new(variant.kind)
                .with_people(3)
                .with_failing_warm_up(),
        ))
    }
}

#[test]
fn warm_up_failure_is_not_fatal() {
    let loader = ModelLoader::new(Arc::new(WarmUpFails), ModelsConfig::stub(3));
    let capability = loader.load(ResourceTier::Constrained).unwrap();
    let frame = image::RgbImage::new(64, 48);
    assert_eq!(capability.detect(&frame).unwrap().len(), 3);
}

#[test]
fn unload_releases_and_is_idempotent() {
    let loader = ModelLoader::new(Arc::new(DefaultModelFactory), ModelsConfig::stub(1));
    let capability = loader.load(ResourceTier::Constrained).unwrap();

    loader.unload();
    loader.unload();

    assert!(capability.is_released());
    assert!(loader.current().is_none());
    assert!(capability.detect(&image::RgbImage::new(8, 8)).is_err());
}
