//! Face attribute service configuration

use serde::Deserialize;
use std::path::PathBuf;

use crate::engine::registry::{ModelKind, ModelSource};
use crate::service::types::DetectionOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub inference: InferenceConfig,
    pub detector: DetectorConfig,
    pub models: ModelsConfig,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// 0 disables the limit
    pub max_concurrent_detections: usize,
    pub post_action: PostAction,
    /// How long in-flight requests get to finish after a restart request
    pub restart_grace_secs: u64,
}

/// What `POST /` does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostAction {
    /// Answer and then stop the server so the supervisor restarts it
    Restart,
    /// Answer 405 and keep serving
    Reject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub input_size: u32,
    pub score_threshold: f32,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Where remote weights are cached after the first download
    pub cache_dir: PathBuf,
    pub detector: String,
    pub landmarks: String,
    pub age_gender: String,
    /// Omitted key disables descriptors
    #[serde(default)]
    pub recognition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: Option<u64>,
    pub max_bytes: usize,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> String {
        std::env::var("FACE_SERVICE_CONFIG").unwrap_or_else(|_| "config.toml".to_string())
    }

    /// Apply `PORT` from the environment on top of the file values
    pub fn with_env_overrides(mut self) -> anyhow::Result<Self> {
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid PORT {:?}: {}", port, e))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let size = self.detector.input_size;
        if size == 0 || size % 32 != 0 {
            anyhow::bail!("detector.input_size must be a positive multiple of 32, got {}", size);
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            anyhow::bail!("detector.score_threshold must be within [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            anyhow::bail!("detector.iou_threshold must be within [0, 1]");
        }
        Ok(())
    }

    pub fn detection_options(&self) -> DetectionOptions {
        DetectionOptions {
            input_size: self.detector.input_size,
            score_threshold: self.detector.score_threshold,
            iou_threshold: self.detector.iou_threshold,
        }
    }

    /// Model sources in load order
    pub fn model_sources(&self) -> Vec<ModelSource> {
        let mut sources = vec![
            ModelSource::new(ModelKind::Detector, &self.models.detector),
            ModelSource::new(ModelKind::Landmarks, &self.models.landmarks),
            ModelSource::new(ModelKind::AgeGender, &self.models.age_gender),
        ];
        if let Some(uri) = &self.models.recognition {
            sources.push(ModelSource::new(ModelKind::Recognition, uri));
        }
        sources
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            inference: InferenceConfig::default(),
            detector: DetectorConfig::default(),
            models: ModelsConfig::default(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            max_concurrent_detections: 0,
            post_action: PostAction::Restart,
            restart_grace_secs: 10,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 416,
            score_threshold: 0.5,
            iou_threshold: 0.4,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("data/models"),
            detector: "weights/tiny_face_detector.onnx".to_string(),
            landmarks: "weights/face_landmark_68.onnx".to_string(),
            age_gender: "weights/age_gender.onnx".to_string(),
            recognition: Some("weights/face_recognition.onnx".to_string()),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.detector.input_size, 416);
        assert_eq!(config.server.post_action, PostAction::Restart);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080
            post_action = "reject"

            [models]
            detector = "https://weights.internal/v3/tiny_face_detector.onnx"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.post_action, PostAction::Reject);
        assert_eq!(config.detector.score_threshold, 0.5);
        assert_eq!(config.models.landmarks, "weights/face_landmark_68.onnx");
    }

    #[test]
    fn test_model_sources_order() {
        let config = Config::default();
        let kinds: Vec<ModelKind> = config.model_sources().iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ModelKind::Detector,
                ModelKind::Landmarks,
                ModelKind::AgeGender,
                ModelKind::Recognition,
            ]
        );

        let mut without = Config::default();
        without.models.recognition = None;
        assert_eq!(without.model_sources().len(), 3);
    }

    #[test]
    fn test_models_table_without_recognition_disables_it() {
        let config: Config = toml::from_str(
            r#"
            [models]
            detector = "weights/tiny_face_detector.onnx"
            landmarks = "weights/face_landmark_68.onnx"
            age_gender = "weights/age_gender.onnx"
            "#,
        )
        .unwrap();

        assert!(config.models.recognition.is_none());
        assert_eq!(config.models.cache_dir, PathBuf::from("data/models"));
        assert_eq!(config.model_sources().len(), 3);
    }

    #[test]
    fn test_shipped_config_without_recognition_line() {
        let shipped = include_str!("../config.toml");
        let edited: String = shipped
            .lines()
            .filter(|line| !line.trim_start().starts_with("recognition"))
            .collect::<Vec<_>>()
            .join("\n");

        let config: Config = toml::from_str(&edited).unwrap();
        assert!(config.models.recognition.is_none());

        let config: Config = toml::from_str(shipped).unwrap();
        assert!(config.models.recognition.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_input_size() {
        let mut config = Config::default();
        config.detector.input_size = 400;
        assert!(config.validate().is_err());
    }
}
