//! Local dense-vector model runner.
//!
//! Runs 768-d embedding inference with ONNX Runtime, one document at a
//! time (batching spikes resident memory on large repos). The session
//! is rotated after a configured number of documents to bound memory
//! growth in long runs. Model-load failures retry three times with
//! exponential backoff (5s / 15s / 45s), clearing the model cache
//! directory between attempts; after that the runner reports itself
//! unavailable and the stage skips embedding.

use std::path::PathBuf;

use ort::session::Session;
use parking_lot::Mutex;

use crate::config::EmbeddingConfig;
use crate::error::{LatticeError, LatticeResult};

/// Backoff schedule for model-load retries, in seconds.
const LOAD_BACKOFF_SECS: [u64; 3] = [5, 15, 45];

/// Abstraction over the local embedding model so pipeline stages and
/// tests run without ONNX Runtime installed.
pub trait DenseVectorModel: Send + Sync {
    /// Embed one document. Returns a vector of the configured
    /// dimensionality; components may be non-finite on model
    /// misbehavior (the caller validates).
    fn embed_one(&self, text: &str) -> LatticeResult<Vec<f32>>;

    /// Whether the model is loaded and operational.
    fn is_available(&self) -> bool;
}

struct RunnerState {
    session: Option<Session>,
    docs_since_rotation: usize,
}

/// ONNX-backed model runner with session rotation.
pub struct OnnxModelRunner {
    config: EmbeddingConfig,
    tokenizer: Option<tokenizers::Tokenizer>,
    state: Mutex<RunnerState>,
}

impl OnnxModelRunner {
    /// Load the model, retrying with backoff and cache clearing.
    /// Always returns a runner; a runner without a session is in
    /// degraded mode.
    pub fn new(config: &EmbeddingConfig) -> Self {
        let session = Self::load_with_retries(&config.model_path);
        let tokenizer_path = config.model_path.with_file_name("tokenizer.json");
        let tokenizer = if tokenizer_path.exists() {
            match tokenizers::Tokenizer::from_file(&tokenizer_path) {
                Ok(tokenizer) => Some(tokenizer),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load tokenizer");
                    None
                }
            }
        } else {
            None
        };

        Self {
            config: config.clone(),
            tokenizer,
            state: Mutex::new(RunnerState {
                session,
                docs_since_rotation: 0,
            }),
        }
    }

    /// A runner with no model (tests, degraded environments).
    pub fn degraded(config: &EmbeddingConfig) -> Self {
        Self {
            config: config.clone(),
            tokenizer: None,
            state: Mutex::new(RunnerState {
                session: None,
                docs_since_rotation: 0,
            }),
        }
    }

    fn load_with_retries(model_path: &PathBuf) -> Option<Session> {
        for (attempt, backoff) in LOAD_BACKOFF_SECS.iter().enumerate() {
            match Self::load_session(model_path) {
                Ok(session) => return Some(session),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        error = %e,
                        "model load failed"
                    );
                    Self::clear_model_cache(model_path);
                    std::thread::sleep(std::time::Duration::from_secs(*backoff));
                }
            }
        }
        match Self::load_session(model_path) {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!(error = %e, "model unavailable, embedding stage will skip");
                None
            }
        }
    }

    fn load_session(model_path: &PathBuf) -> LatticeResult<Session> {
        if !model_path.exists() {
            return Err(LatticeError::Internal(format!(
                "model file missing: {}",
                model_path.display()
            )));
        }
        Session::builder()
            .map_err(|e| LatticeError::Internal(format!("session builder: {e}")))?
            .commit_from_file(model_path)
            .map_err(|e| LatticeError::Internal(format!("model load: {e}")))
    }

    /// ONNX Runtime caches compiled artifacts next to the model; a
    /// corrupt cache can poison every subsequent load attempt.
    fn clear_model_cache(model_path: &PathBuf) {
        if let Some(dir) = model_path.parent() {
            let cache_dir = dir.join(".ort-cache");
            if cache_dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(&cache_dir) {
                    tracing::debug!(error = %e, "cache clear failed");
                }
            }
        }
    }

    /// Tokenize to at most `max_len` tokens, returning padded ids and
    /// attention mask.
    fn tokenize(&self, text: &str, max_len: usize) -> LatticeResult<(Vec<i64>, Vec<i64>)> {
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or_else(|| LatticeError::Internal("tokenizer not loaded".into()))?;
        let encoding = tokenizer
            .encode(text, true)
            .map_err(|e| LatticeError::Internal(format!("tokenization: {e}")))?;

        let ids = encoding.get_ids();
        let mask = encoding.get_attention_mask();
        let actual = ids.len().min(max_len);

        let mut input_ids = Vec::with_capacity(max_len);
        let mut attention = Vec::with_capacity(max_len);
        for i in 0..actual {
            input_ids.push(ids[i] as i64);
            attention.push(mask[i] as i64);
        }
        input_ids.resize(max_len, 0);
        attention.resize(max_len, 0);
        Ok((input_ids, attention))
    }

    fn run_inference(&self, session: &mut Session, text: &str) -> LatticeResult<Vec<f32>> {
        let max_len = self.config.max_seq_length;
        let (input_ids, attention_mask) = self.tokenize(text, max_len)?;
        let shape = vec![1i64, max_len as i64];

        let ids_value = ort::value::Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| LatticeError::Internal(format!("tensor: {e}")))?;
        let mask_value = ort::value::Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| LatticeError::Internal(format!("tensor: {e}")))?;

        use std::borrow::Cow;
        let inputs: Vec<(Cow<'_, str>, ort::session::SessionInputValue<'_>)> = vec![
            (
                Cow::Borrowed("input_ids"),
                ort::session::SessionInputValue::from(ids_value),
            ),
            (
                Cow::Borrowed("attention_mask"),
                ort::session::SessionInputValue::from(mask_value),
            ),
        ];

        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| LatticeError::Internal("model has no outputs".into()))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| LatticeError::Internal(format!("inference: {e}")))?;
        let output = outputs
            .get(&output_name)
            .ok_or_else(|| LatticeError::Internal("no output tensor".into()))?;
        let (output_shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| LatticeError::Internal(format!("extract: {e}")))?;

        let dims: Vec<usize> = output_shape.iter().map(|&d| d as usize).collect();
        let vector = match dims.len() {
            // [1, seq_len, hidden] -> attention-masked mean pool.
            3 => {
                let seq_len = dims[1];
                let hidden = dims[2];
                let mut pooled = vec![0.0f32; hidden];
                let mut mask_sum = 0.0f32;
                for s in 0..seq_len {
                    let mask = attention_mask.get(s).copied().unwrap_or(0) as f32;
                    mask_sum += mask;
                    for d in 0..hidden {
                        pooled[d] += data[s * hidden + d] * mask;
                    }
                }
                if mask_sum > 0.0 {
                    for component in &mut pooled {
                        *component /= mask_sum;
                    }
                }
                pooled
            }
            // [1, hidden] -> already pooled.
            2 => data[..dims[1]].to_vec(),
            _ => {
                return Err(LatticeError::Internal(format!(
                    "unexpected output shape: {dims:?}"
                )))
            }
        };

        Ok(l2_normalize(vector))
    }
}

impl DenseVectorModel for OnnxModelRunner {
    fn embed_one(&self, text: &str) -> LatticeResult<Vec<f32>> {
        let mut state = self.state.lock();

        // Session rotation bounds resident memory on long runs.
        if state.docs_since_rotation >= self.config.session_rotate_every {
            tracing::debug!(
                docs = state.docs_since_rotation,
                "rotating inference session"
            );
            state.session = Self::load_session(&self.config.model_path).ok();
            state.docs_since_rotation = 0;
        }

        let session = state.session.as_mut().ok_or_else(|| {
            LatticeError::Internal("embedding model unavailable".into())
        })?;
        let vector = self.run_inference_on(session, text)?;
        state.docs_since_rotation += 1;
        Ok(vector)
    }

    fn is_available(&self) -> bool {
        self.state.lock().session.is_some()
    }
}

impl OnnxModelRunner {
    fn run_inference_on(&self, session: &mut Session, text: &str) -> LatticeResult<Vec<f32>> {
        self.run_inference(session, text)
    }
}

/// L2-normalize in place and return the vector.
pub fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for component in &mut vector {
            *component /= norm;
        }
    }
    vector
}

/// Deterministic stub model for tests: hash-projected vectors, or
/// scripted failures/poisoned vectors.
pub struct StubModel {
    dimensions: usize,
    /// When set, this exact vector is returned for every call.
    pub fixed: Option<Vec<f32>>,
}

impl StubModel {
    /// A stub producing valid deterministic vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: None,
        }
    }

    /// A stub that always returns the given vector.
    pub fn fixed(vector: Vec<f32>) -> Self {
        Self {
            dimensions: vector.len(),
            fixed: Some(vector),
        }
    }
}

impl DenseVectorModel for StubModel {
    fn embed_one(&self, text: &str) -> LatticeResult<Vec<f32>> {
        if let Some(fixed) = &self.fixed {
            return Ok(fixed.clone());
        }
        let mut vector = vec![0.0f32; self.dimensions];
        let hash = xxhash_rust::xxh3::xxh3_64(text.as_bytes());
        vector[(hash % self.dimensions as u64) as usize] = 1.0;
        Ok(vector)
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_runner_reports_unavailable() {
        let runner = OnnxModelRunner::degraded(&EmbeddingConfig::default());
        assert!(!runner.is_available());
        assert!(runner.embed_one("text").is_err());
    }

    #[test]
    fn test_l2_normalize() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);

        // Zero vector stays zero instead of dividing by zero.
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_stub_model_is_deterministic() {
        let stub = StubModel::new(768);
        let a = stub.embed_one("hello").expect("embed");
        let b = stub.embed_one("hello").expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 768);
    }
}
