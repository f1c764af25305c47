use candle_core::{Device, Tensor};
use pylate_rs::ColBERT;

use crate::error::{Error, Result};

/// Default encoder for the dense variants.
pub const DEFAULT_QUERY_MODEL: &str = "lightonai/GTE-ModernColBERT-v1";
pub const DEFAULT_PASSAGE_MODEL: &str = "lightonai/GTE-ModernColBERT-v1";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// A loaded encoder bound to one model id.
///
/// Construction downloads and loads the model eagerly; a model that cannot
/// be loaded fails pipeline construction with [`Error::ModelUnavailable`]
/// rather than failing later mid-batch.
pub struct EncoderModel {
    model: ColBERT,
    model_id: String,
}

impl EncoderModel {
    /// Load the named encoder, downloading from HuggingFace Hub if needed.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = default_device();
        let model: ColBERT = ColBERT::from(model_id)
            .with_device(device)
            .try_into()
            .map_err(|e| Error::ModelUnavailable {
                model: model_id.to_string(),
                reason: format!("{e}"),
            })?;

        Ok(Self {
            model,
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Encode queries in one batched call.
    ///
    /// Returns one `[Q, D]` token-embedding tensor per query, in input order.
    pub fn encode_queries(&mut self, queries: &[String]) -> Result<Vec<Tensor>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self
            .model
            .encode(queries, true)
            .map_err(|e| Error::batch("query encoding", e))?;

        let mut per_query = Vec::with_capacity(queries.len());
        for i in 0..queries.len() {
            per_query.push(
                embeddings
                    .get(i)
                    .map_err(|e| Error::batch("query encoding", e))?,
            );
        }
        Ok(per_query)
    }

    /// Encode passages in one batched call.
    ///
    /// Returns a `[B, T, D]` tensor: batch, passage tokens, dimension.
    pub fn encode_passages(&mut self, passages: &[String]) -> Result<Tensor> {
        self.model
            .encode(passages, false)
            .map_err(|e| Error::batch("passage encoding", e))
    }
}

impl std::fmt::Debug for EncoderModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderModel")
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bogus_model_id_is_model_unavailable() {
        let err = EncoderModel::load("docpipe-tests/definitely-not-a-model")
            .unwrap_err();
        match err {
            Error::ModelUnavailable { model, .. } => {
                assert_eq!(model, "docpipe-tests/definitely-not-a-model");
            }
            other => panic!("expected ModelUnavailable, got: {other}"),
        }
    }
}
