//! Detection Pipeline
//!
//! Ensures the models are loaded, downloads the image and runs the model chain
//! selected by the request's detection mode.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, GenericImageView};
use tokio::sync::Semaphore;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::engine::inference::FaceModels;
use crate::engine::preprocess::crop;
use crate::engine::registry::{ModelKind, ModelLoader, ModelRegistry, ModelSet};
use crate::utils::error::FaceError;
use crate::utils::image::decode_image;

use super::types::{DetectionMode, DetectionOptions, FaceRecord, RawFace};

/// Detection pipeline shared by all requests
pub struct DetectionPipeline<L: ModelLoader> {
    registry: Arc<ModelRegistry<L>>,
    client: reqwest::Client,
    options: DetectionOptions,
    max_bytes: usize,
    limiter: Option<Semaphore>,
}

impl<L> DetectionPipeline<L>
where
    L: ModelLoader,
    ModelSet<L::Model>: FaceModels,
{
    pub fn new(registry: Arc<ModelRegistry<L>>, config: &Config) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("face-attr/", env!("CARGO_PKG_VERSION")));
        if let Some(secs) = config.fetch.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let limit = config.server.max_concurrent_detections;

        Ok(Self {
            registry,
            client: builder.build()?,
            options: config.detection_options(),
            max_bytes: config.fetch.max_bytes,
            limiter: (limit > 0).then(|| Semaphore::new(limit)),
        })
    }

    pub fn registry(&self) -> &Arc<ModelRegistry<L>> {
        &self.registry
    }

    /// Run detection for one request
    pub async fn detect(
        &self,
        url: &str,
        mode: DetectionMode,
    ) -> Result<Vec<FaceRecord>, FaceError> {
        let span = tracing::info_span!(
            "detect",
            request_id = %Uuid::new_v4(),
            mode = mode.as_str()
        );
        self.detect_inner(url, mode).instrument(span).await
    }

    async fn detect_inner(
        &self,
        url: &str,
        mode: DetectionMode,
    ) -> Result<Vec<FaceRecord>, FaceError> {
        let start = Instant::now();

        let models = self.registry.ensure_loaded().await?;
        if mode.needs_descriptor() && !models.has_recognition() {
            return Err(FaceError::ModelUnavailable(ModelKind::Recognition));
        }

        let _permit = match &self.limiter {
            Some(limiter) => Some(
                limiter
                    .acquire()
                    .await
                    .map_err(|e| {
                        FaceError::inference(format!("detection limiter closed: {}", e))
                    })?,
            ),
            None => None,
        };

        let image = self.fetch_image(url).await?;
        let options = self.options;

        let records = tokio::task::spawn_blocking(move || {
            run_chain(models.as_ref(), &image, mode, &options)
        })
        .await
        .map_err(FaceError::inference)??;

        info!(
            "Detected {} faces ({}) in {}ms",
            records.len(),
            mode.as_str(),
            start.elapsed().as_millis()
        );

        Ok(records)
    }

    /// Download and decode an image
    pub async fn fetch_image(&self, url: &str) -> Result<DynamicImage, FaceError> {
        let fetch_error = |reason: String| FaceError::Fetch {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fetch_error(e.to_string()))?;

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(fetch_error(format!("body of {} bytes exceeds limit", len)));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| fetch_error(e.to_string()))? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(fetch_error(format!(
                    "body exceeds limit of {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        debug!("Fetched {} bytes from {}", body.len(), url);

        let decoded = tokio::task::spawn_blocking(move || decode_image(&body))
            .await
            .map_err(FaceError::inference)?;

        decoded.map_err(|source| FaceError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Run the mode's model chain on every detected face, in detector order.
///
/// Any per-face failure fails the whole request.
pub fn run_chain<M: FaceModels + ?Sized>(
    models: &M,
    image: &DynamicImage,
    mode: DetectionMode,
    options: &DetectionOptions,
) -> Result<Vec<FaceRecord>, FaceError> {
    let failed = |e: anyhow::Error| FaceError::inference(format!("{:#}", e));
    let (width, height) = image.dimensions();

    let faces = models.detect(image, options).map_err(failed)?;

    faces
        .into_iter()
        .map(|detection| {
            let landmarks = models.landmarks(image, &detection).map_err(failed)?;
            let aligned_rect = landmarks.aligned_rect(width, height);
            let (aligned, _) = crop(image, &aligned_rect)
                .ok_or_else(|| FaceError::inference("aligned face lies outside the image"))?;

            let age_gender = if mode.needs_age_gender() {
                Some(models.age_gender(&aligned).map_err(failed)?)
            } else {
                None
            };
            let descriptor = if mode.needs_descriptor() {
                Some(models.descriptor(&aligned).map_err(failed)?)
            } else {
                None
            };

            FaceRecord::project(
                mode,
                RawFace {
                    detection,
                    landmarks,
                    aligned_rect,
                    age_gender,
                    descriptor,
                },
            )
        })
        .collect()
}
