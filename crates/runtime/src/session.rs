//! ONNX session management
//!
//! One [`SessionManager`] owns every loaded model. Sessions share the
//! process-wide ort environment, which is committed exactly once. Input and
//! output names are read from the graph at load time and cached so the
//! generation loop never goes back to the runtime for metadata.

use std::collections::HashMap;
use std::path::Path;

use once_cell::sync::Lazy;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;

use voxclone_core::{Error, ModelError, Result};

static ORT_ENV: Lazy<()> = Lazy::new(|| {
    let _ = ort::init().with_name("voxclone").commit();
});

/// Simplified element type of a graph input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    F32,
    F16,
    I64,
    I32,
    Other,
}

impl ElemType {
    fn from_ort(ty: Option<TensorElementType>) -> Self {
        match ty {
            Some(TensorElementType::Float32) => ElemType::F32,
            Some(TensorElementType::Float16) => ElemType::F16,
            Some(TensorElementType::Int64) => ElemType::I64,
            Some(TensorElementType::Int32) => ElemType::I32,
            _ => ElemType::Other,
        }
    }
}

/// Session-level tuning knobs.
#[derive(Debug, Clone, Default)]
pub struct SessionManagerOptions {
    /// Intra- and inter-op thread count. `None` picks
    /// `max(2, available_parallelism / 4)`: the generator is memory-bound
    /// and over-threading worsens contention.
    pub threads: Option<usize>,
}

fn default_threads() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cores / 4).max(2)
}

/// A loaded model session plus its cached graph metadata.
#[derive(Debug)]
pub struct ModelHandle {
    name: String,
    session: Session,
    input_names: Vec<String>,
    output_names: Vec<String>,
    input_types: Vec<ElemType>,
    output_types: Vec<ElemType>,
}

impl ModelHandle {
    /// Logical name this model was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Graph input names, in declaration order.
    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    /// Graph output names, in declaration order.
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn input_types(&self) -> &[ElemType] {
        &self.input_types
    }

    pub fn output_types(&self) -> &[ElemType] {
        &self.output_types
    }

    /// Mutable access to the underlying session.
    ///
    /// `run` takes `&mut Session`, which also enforces the one outstanding
    /// invocation per handle rule at compile time.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}

/// Name-indexed store of loaded ONNX sessions.
pub struct SessionManager {
    handles: HashMap<String, ModelHandle>,
    options: SessionManagerOptions,
}

impl SessionManager {
    pub fn new(options: SessionManagerOptions) -> Self {
        Lazy::force(&ORT_ENV);
        Self {
            handles: HashMap::new(),
            options,
        }
    }

    /// Load a model from `path` under `name`.
    ///
    /// Fails with [`ModelError::NotFound`] when the file is absent,
    /// [`ModelError::AlreadyLoaded`] when the logical name is taken, and
    /// [`ModelError::Load`] for anything the runtime rejects.
    pub fn load(&mut self, name: &str, path: &Path) -> Result<()> {
        if self.handles.contains_key(name) {
            return Err(ModelError::AlreadyLoaded(name.to_string()).into());
        }
        if !path.is_file() {
            return Err(ModelError::NotFound(path.display().to_string()).into());
        }

        let threads = self.options.threads.unwrap_or_else(default_threads);

        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.with_inter_threads(threads))
            .and_then(|b| b.with_parallel_execution(true))
            .and_then(|b| b.with_memory_pattern(true))
            .and_then(|b| b.commit_from_file(path))
            .map_err(|e| ModelError::Load {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let input_names: Vec<String> = session
            .inputs
            .iter()
            .map(|i| i.name.clone())
            .collect();
        let input_types: Vec<ElemType> = session
            .inputs
            .iter()
            .map(|i| ElemType::from_ort(i.input_type.tensor_type()))
            .collect();
        let output_names: Vec<String> = session
            .outputs
            .iter()
            .map(|o| o.name.clone())
            .collect();
        let output_types: Vec<ElemType> = session
            .outputs
            .iter()
            .map(|o| ElemType::from_ort(o.output_type.tensor_type()))
            .collect();

        tracing::info!(
            model = name,
            path = %path.display(),
            inputs = input_names.len(),
            outputs = output_names.len(),
            threads,
            "loaded onnx session"
        );

        self.handles.insert(
            name.to_string(),
            ModelHandle {
                name: name.to_string(),
                session,
                input_names,
                output_names,
                input_types,
                output_types,
            },
        );
        Ok(())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ModelHandle> {
        self.handles.get(name)
    }

    /// Handle lookup for invocation; missing models surface as
    /// [`ModelError::NotReady`].
    pub fn get_mut(&mut self, name: &str) -> Result<&mut ModelHandle> {
        self.handles
            .get_mut(name)
            .ok_or_else(|| Error::from(ModelError::NotReady))
    }

    /// Drop every session. The shared environment outlives them.
    pub fn unload_all(&mut self) {
        let count = self.handles.len();
        self.handles.clear();
        if count > 0 {
            tracing::info!(count, "unloaded onnx sessions");
        }
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.handles.keys().map(|k| k.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_threads_floor() {
        assert!(default_threads() >= 2);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let mut mgr = SessionManager::new(SessionManagerOptions::default());
        let err = mgr
            .load("speech_encoder", Path::new("/nonexistent/model.onnx"))
            .unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::NotFound(_))));
    }

    #[test]
    fn test_get_mut_missing_is_not_ready() {
        let mut mgr = SessionManager::new(SessionManagerOptions::default());
        let err = mgr.get_mut("language_model").unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::NotReady)));
    }
}
