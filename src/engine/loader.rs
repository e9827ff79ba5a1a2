//! OpenVINO model loader
//!
//! Resolves a model source to a file on disk (downloading remote weights into
//! the cache directory once) and compiles it for the configured device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array4;
use openvino::{CompiledModel, Core, ElementType, InferRequest, Shape, Tensor};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::registry::{ModelLoader, ModelSource};
use crate::config::Config;

/// Wrapper for OpenVINO Core that implements Send + Sync
struct SafeCore(Core);
unsafe impl Send for SafeCore {}
unsafe impl Sync for SafeCore {}

/// A compiled model shared by all requests.
///
/// Only creating an infer request takes the lock; each inference then runs on
/// its own request.
pub struct OpenVinoModel {
    compiled: Mutex<CompiledModel>,
}
unsafe impl Send for OpenVinoModel {}
unsafe impl Sync for OpenVinoModel {}

impl OpenVinoModel {
    fn new(compiled: CompiledModel) -> Self {
        Self {
            compiled: Mutex::new(compiled),
        }
    }

    /// Run the model on a single NCHW input
    pub fn infer(&self, input: &Array4<f32>) -> Result<InferRequest> {
        let mut request = self.compiled.lock().create_infer_request()?;

        let dims: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let shape = Shape::new(&dims)?;
        let mut tensor = Tensor::new(ElementType::F32, &shape)?;

        let input_data = input
            .as_slice()
            .context("input tensor is not in standard layout")?;
        unsafe {
            let tensor_data = tensor.get_raw_data_mut()?.as_mut_ptr() as *mut f32;
            std::ptr::copy_nonoverlapping(input_data.as_ptr(), tensor_data, input_data.len());
        }

        request.set_input_tensor(&tensor)?;
        request.infer()?;
        Ok(request)
    }
}

/// Read output `index` of a finished request as `(dims, values)`
pub fn read_output(request: &InferRequest, index: usize) -> Result<(Vec<i64>, Vec<f32>)> {
    let tensor = request
        .get_output_tensor_by_index(index)
        .with_context(|| format!("model has no output {}", index))?;
    let dims: Vec<i64> = tensor.get_shape()?.get_dimensions().to_vec();
    let len = dims.iter().product::<i64>().max(0) as usize;

    let data: Vec<f32> = unsafe {
        let ptr = tensor.get_raw_data()?.as_ptr() as *const f32;
        std::slice::from_raw_parts(ptr, len).to_vec()
    };

    Ok((dims, data))
}

/// Number of outputs a finished request exposes
pub fn output_count(request: &InferRequest) -> usize {
    (0..8)
        .take_while(|&i| request.get_output_tensor_by_index(i).is_ok())
        .count()
}

/// Loads models through OpenVINO, downloading remote weights on first use
pub struct OpenVinoLoader {
    core: Arc<Mutex<Option<SafeCore>>>,
    device: String,
    cache_dir: PathBuf,
    client: reqwest::Client,
}

impl OpenVinoLoader {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("face-attr/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            core: Arc::new(Mutex::new(None)),
            device: config.inference.device.clone(),
            cache_dir: config.models.cache_dir.clone(),
            client,
        })
    }

    /// Turn a source into a local model file
    pub async fn resolve(&self, source: &ModelSource) -> Result<PathBuf> {
        let uri = source.uri.as_str();

        if !is_remote(uri) {
            let path = PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri));
            if !path.exists() {
                anyhow::bail!("model file {} does not exist", path.display());
            }
            return Ok(path);
        }

        let dir = self.cache_dir.join(source.kind.as_str());
        let cached = dir.join(file_name(uri)?);
        if cached.exists() {
            debug!("Using cached model {}", cached.display());
            return Ok(cached);
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;

        // IR models keep their weights next to the topology
        if let Some(stem) = uri.strip_suffix(".xml") {
            let bin_url = format!("{}.bin", stem);
            self.download(&bin_url, &cached.with_extension("bin")).await?;
        }
        self.download(uri, &cached).await?;

        Ok(cached)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("download failed for {}", url))?
            .error_for_status()
            .with_context(|| format!("download failed for {}", url))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("download failed for {}", url))?;

        // Write to a temp file first, then rename for atomicity
        let temp_path = dest.with_extension("part");
        tokio::fs::write(&temp_path, &bytes)
            .await
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        tokio::fs::rename(&temp_path, dest)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;

        debug!("Downloaded {} bytes to {}", bytes.len(), dest.display());
        Ok(())
    }

    fn compile(core: &Mutex<Option<SafeCore>>, path: &Path, device: &str) -> Result<OpenVinoModel> {
        let mut guard = core.lock();
        if guard.is_none() {
            *guard = Some(SafeCore(Core::new()?));
        }
        let core = &mut guard.as_mut().context("OpenVINO core unavailable")?.0;

        let model_path = path.to_str().context("model path is not valid UTF-8")?;
        let weights_path = if path.extension().is_some_and(|ext| ext == "xml") {
            path.with_extension("bin").to_string_lossy().into_owned()
        } else {
            String::new()
        };

        let model = core.read_model_from_file(model_path, &weights_path)?;
        let compiled = core.compile_model(&model, device.into())?;
        Ok(OpenVinoModel::new(compiled))
    }
}

#[async_trait]
impl ModelLoader for OpenVinoLoader {
    type Model = OpenVinoModel;

    async fn load(&self, source: &ModelSource) -> Result<OpenVinoModel> {
        let path = self.resolve(source).await?;

        let core = self.core.clone();
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || Self::compile(&core, &path, &device))
            .await
            .context("model compilation task panicked")?
    }
}

fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Last path segment of a URL, without query or fragment
fn file_name(uri: &str) -> Result<String> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .with_context(|| format!("cannot derive a file name from {}", uri))
}
