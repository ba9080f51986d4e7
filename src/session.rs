use std::path::{Path, PathBuf};

use ndarray::{Array4, ArrayD};
use ort::{inputs, ExecutionProviderDispatch, GraphOptimizationLevel, Session};
use tracing::instrument;

use crate::Result;

/// A model that maps one `(N, C, H, W)` input tensor to an output tensor.
///
/// `Ok(None)` means the model ran but produced no output. Implementations are
/// shared across recognition workers, so they must tolerate concurrent calls
/// (or serialise internally).
pub trait InferenceSession: Send + Sync {
    fn run(&self, input: Array4<f32>) -> Result<Option<ArrayD<f32>>>;
}

impl<S: InferenceSession + ?Sized> InferenceSession for Box<S> {
    fn run(&self, input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        (**self).run(input)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Default,
    #[cfg(feature = "tensorrt")]
    TensorRT,
    #[cfg(feature = "coreml")]
    CoreML,
    #[cfg(feature = "cuda")]
    Cuda,
    #[cfg(feature = "directml")]
    DirectML,
}

pub(crate) const DEFAULT_PROVIDERS: &[ExecutionProvider] = &[
    #[cfg(feature = "tensorrt")]
    ExecutionProvider::TensorRT,
    #[cfg(feature = "coreml")]
    ExecutionProvider::CoreML,
    #[cfg(feature = "directml")]
    ExecutionProvider::DirectML,
    #[cfg(feature = "cuda")]
    ExecutionProvider::Cuda,
    ExecutionProvider::Default,
];

/// TensorRT optimisation profile for the model's `x` input.
#[derive(Debug, Clone)]
pub struct ShapeProfile {
    pub min: String,
    pub opt: String,
    pub max: String,
}

impl ShapeProfile {
    pub fn detection(max_side_len: u32) -> Self {
        Self {
            min: "x:1x3x32x32".into(),
            opt: format!("x:1x3x{max_side_len}x{max_side_len}"),
            max: format!("x:1x3x{max_side_len}x{max_side_len}"),
        }
    }

    pub fn recognition(height: u32) -> Self {
        Self {
            min: format!("x:1x3x{height}x1"),
            opt: format!("x:1x3x{height}x256"),
            max: format!("x:1x3x{height}x{}", u16::MAX),
        }
    }

    pub fn classifier() -> Self {
        Self {
            min: "x:1x3x48x192".into(),
            opt: "x:1x3x48x192".into(),
            max: "x:1x3x48x192".into(),
        }
    }
}

#[cfg(feature = "tensorrt")]
fn setup_tensorrt(cache_path: PathBuf, profile: &ShapeProfile) -> ExecutionProviderDispatch {
    use ort::TensorRTExecutionProvider;

    TensorRTExecutionProvider::default()
        .with_profile_min_shapes(profile.min.clone())
        .with_profile_max_shapes(profile.max.clone())
        .with_profile_opt_shapes(profile.opt.clone())
        .with_engine_cache(true)
        .with_engine_cache_path(cache_path.to_string_lossy())
        .with_timing_cache(true)
        .with_builder_optimization_level(5)
        .with_detailed_build_log(true)
        .build()
}

#[cfg(feature = "cuda")]
fn setup_cuda() -> ExecutionProviderDispatch {
    use ort::CUDAExecutionProvider;

    CUDAExecutionProvider::default().build()
}

#[cfg(feature = "coreml")]
fn setup_coreml() -> ExecutionProviderDispatch {
    use ort::CoreMLExecutionProvider;

    CoreMLExecutionProvider::default().build()
}

#[cfg(feature = "directml")]
fn setup_directml() -> ExecutionProviderDispatch {
    use ort::DirectMLExecutionProvider;

    DirectMLExecutionProvider::default().build()
}

/// [`InferenceSession`] backed by ONNX Runtime.
pub struct OrtSession {
    session: Session,
    input_name: String,
}

impl std::fmt::Debug for OrtSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrtSession")
            .field("input_name", &self.input_name)
            .finish_non_exhaustive()
    }
}

impl OrtSession {
    #[instrument(level = "debug", skip(profile))]
    pub fn init(
        path: &Path,
        num_threads: usize,
        execution_providers: &[ExecutionProvider],
        cache_path: Option<&Path>,
        profile: &ShapeProfile,
    ) -> Result<Self> {
        #[cfg(feature = "directml")]
        let parallel = !execution_providers.contains(&ExecutionProvider::DirectML);
        #[cfg(not(feature = "directml"))]
        let parallel = true;

        let cache_path = cache_path.map(Path::to_path_buf).unwrap_or_else(|| {
            path.parent()
                .map(|parent| parent.join(".cache"))
                .unwrap_or_else(|| PathBuf::from(".cache"))
        });

        let execution_providers = execution_providers
            .iter()
            .filter_map(|provider| -> Option<ExecutionProviderDispatch> {
                match provider {
                    ExecutionProvider::Default => None,
                    #[cfg(feature = "tensorrt")]
                    ExecutionProvider::TensorRT => {
                        Some(setup_tensorrt(cache_path.clone(), profile))
                    }
                    #[cfg(feature = "coreml")]
                    ExecutionProvider::CoreML => Some(setup_coreml()),
                    #[cfg(feature = "cuda")]
                    ExecutionProvider::Cuda => Some(setup_cuda()),
                    #[cfg(feature = "directml")]
                    ExecutionProvider::DirectML => Some(setup_directml()),
                }
            })
            .collect::<Vec<_>>();
        log::trace!(
            "{} accelerated providers, engine cache at {}, profile {profile:?}",
            execution_providers.len(),
            cache_path.display()
        );

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_memory_pattern(parallel)?
            .with_parallel_execution(parallel)?
            .with_inter_threads(num_threads)?
            .with_intra_threads(num_threads)?
            .with_execution_providers(execution_providers)?
            .commit_from_file(path)?;

        log::debug!("{} inputs: {:?}", path.display(), session.inputs);
        log::debug!("{} outputs: {:?}", path.display(), session.outputs);

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        Ok(Self {
            session,
            input_name,
        })
    }
}

impl InferenceSession for OrtSession {
    fn run(&self, input: Array4<f32>) -> Result<Option<ArrayD<f32>>> {
        let outputs = self
            .session
            .run(inputs![self.input_name.as_str() => input]?)?;
        let Some((_, value)) = outputs.first_key_value() else {
            return Ok(None);
        };
        let tensor = value.try_extract_tensor::<f32>()?;
        Ok(Some(tensor.to_owned()))
    }
}
