//! Model Registry
//!
//! Owns the detector, landmark, age/gender and recognition models and loads
//! them exactly once, on first use. Concurrent first requests wait for the
//! single in-flight load instead of starting their own. A failed load leaves
//! the registry in `Failed` and the next caller retries the whole sequence.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::utils::error::FaceError;

/// Model capabilities the service uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ModelKind {
    Detector,
    Landmarks,
    AgeGender,
    Recognition,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Detector => "tiny_face_detector",
            ModelKind::Landmarks => "face_landmark_68",
            ModelKind::AgeGender => "age_gender",
            ModelKind::Recognition => "face_recognition",
        }
    }
}

/// Where a model's weights live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    pub kind: ModelKind,
    pub uri: String,
}

impl ModelSource {
    pub fn new(kind: ModelKind, uri: impl Into<String>) -> Self {
        Self {
            kind,
            uri: uri.into(),
        }
    }
}

/// Per-model load state, as reported by the health endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// The loaded models. Recognition is optional.
#[derive(Debug)]
pub struct ModelSet<M> {
    pub detector: M,
    pub landmarks: M,
    pub age_gender: M,
    pub recognition: Option<M>,
}

impl<M> ModelSet<M> {
    pub fn recognition(&self) -> Result<&M, FaceError> {
        self.recognition
            .as_ref()
            .ok_or(FaceError::ModelUnavailable(ModelKind::Recognition))
    }

    fn assemble(loaded: Vec<(ModelKind, M)>) -> anyhow::Result<Self> {
        let mut by_kind: HashMap<ModelKind, M> = loaded.into_iter().collect();
        let mut take = |kind: ModelKind| {
            by_kind
                .remove(&kind)
                .with_context(|| format!("model {} was not loaded", kind.as_str()))
        };

        Ok(Self {
            detector: take(ModelKind::Detector)?,
            landmarks: take(ModelKind::Landmarks)?,
            age_gender: take(ModelKind::AgeGender)?,
            recognition: take(ModelKind::Recognition).ok(),
        })
    }
}

/// Loads a single model from its source
#[async_trait]
pub trait ModelLoader: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    async fn load(&self, source: &ModelSource) -> anyhow::Result<Self::Model>;
}

enum LoadState<M> {
    Unloaded,
    Loading,
    Ready(Arc<ModelSet<M>>),
    Failed(String),
}

/// One-shot, concurrency-safe model registry
pub struct ModelRegistry<L: ModelLoader> {
    loader: L,
    sources: Vec<ModelSource>,
    state: Mutex<LoadState<L::Model>>,
    ready: OnceLock<Arc<ModelSet<L::Model>>>,
    model_states: RwLock<Vec<(ModelKind, ModelState)>>,
}

impl<L: ModelLoader> ModelRegistry<L> {
    /// Create a registry. Sources load in the given order and must include
    /// the detector, landmark and age/gender models.
    pub fn new(loader: L, sources: Vec<ModelSource>) -> anyhow::Result<Self> {
        for required in [ModelKind::Detector, ModelKind::Landmarks, ModelKind::AgeGender] {
            if !sources.iter().any(|s| s.kind == required) {
                anyhow::bail!("no source configured for model {}", required.as_str());
            }
        }

        let model_states = sources
            .iter()
            .map(|s| (s.kind, ModelState::Unloaded))
            .collect();

        Ok(Self {
            loader,
            sources,
            state: Mutex::new(LoadState::Unloaded),
            ready: OnceLock::new(),
            model_states: RwLock::new(model_states),
        })
    }

    /// Load every model if that has not happened yet and return the set.
    ///
    /// Idempotent: once ready, this returns immediately without touching the
    /// loader again.
    pub async fn ensure_loaded(&self) -> Result<Arc<ModelSet<L::Model>>, FaceError> {
        if let Some(models) = self.ready.get() {
            return Ok(models.clone());
        }

        let mut state = self.state.lock().await;
        match &*state {
            LoadState::Ready(models) => return Ok(models.clone()),
            LoadState::Failed(reason) => {
                info!("Retrying model load after earlier failure: {}", reason);
            }
            LoadState::Loading => {
                // The lock is free, so whoever was loading was cancelled
                warn!("Previous model load was interrupted, starting over");
            }
            LoadState::Unloaded => {}
        }
        *state = LoadState::Loading;

        info!("LOAD MODELS...");
        let start = Instant::now();

        match self.load_all().await {
            Ok(models) => {
                let models = Arc::new(models);
                *state = LoadState::Ready(models.clone());
                let _ = self.ready.set(models.clone());
                info!("All models loaded in {:?}", start.elapsed());
                Ok(models)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!("Model loading failed: {}", reason);
                *state = LoadState::Failed(reason.clone());
                Err(FaceError::ModelLoad(reason))
            }
        }
    }

    async fn load_all(&self) -> anyhow::Result<ModelSet<L::Model>> {
        let mut loaded = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            self.set_model_state(source.kind, ModelState::Loading);
            info!("Loading model: {} from {}", source.kind.as_str(), source.uri);
            let start = Instant::now();

            match self.loader.load(source).await {
                Ok(model) => {
                    self.set_model_state(source.kind, ModelState::Ready);
                    info!("Model {} loaded in {:?}", source.kind.as_str(), start.elapsed());
                    loaded.push((source.kind, model));
                }
                Err(e) => {
                    self.set_model_state(source.kind, ModelState::Failed);
                    return Err(e.context(format!(
                        "loading {} from {}",
                        source.kind.as_str(),
                        source.uri
                    )));
                }
            }
        }

        ModelSet::assemble(loaded)
    }

    fn set_model_state(&self, kind: ModelKind, new_state: ModelState) {
        let mut states = self.model_states.write();
        if let Some(entry) = states.iter_mut().find(|(k, _)| *k == kind) {
            entry.1 = new_state;
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.get().is_some()
    }

    /// Get status of all configured models, in load order
    pub fn status(&self) -> Vec<(ModelKind, ModelState)> {
        self.model_states.read().clone()
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }
}
