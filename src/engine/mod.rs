//! Inference engine module
//!
//! Provides OpenVINO-based inference with:
//! - One-time lazy model loading shared by all requests
//! - Per-network pre/post-processing for the face model chain
//! - Blocking inference meant to run on the tokio blocking pool

pub mod registry;
pub mod loader;
pub mod inference;
pub mod detector;
pub mod landmarks;
pub mod attribute;
pub mod embedder;
pub mod preprocess;

pub use registry::{ModelKind, ModelLoader, ModelRegistry, ModelSet, ModelSource, ModelState};
pub use loader::{OpenVinoLoader, OpenVinoModel};
pub use inference::FaceModels;
pub use detector::FaceBox;
pub use landmarks::FaceLandmarks;
pub use attribute::{AgeGender, Gender};
