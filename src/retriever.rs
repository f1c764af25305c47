//! Retrieval strategies shared by the search and indexing sides of a
//! pipeline.
//!
//! The keyword strategy scores lexically, picking BM25 or TF-IDF to match
//! the bound store backend. The dense strategy scores mean-pooled fragment
//! vectors by dot product against the pooled query, optionally re-scoring
//! the top candidates with token-level MaxSim (trading latency for
//! precision); the re-ranked list replaces the first-stage ranking.

use candle_core::Tensor;
use rayon::prelude::*;

use crate::{
    document::Fragment,
    embedding_db::{EmbeddingDb, EmbeddingMatrix},
    error::{Error, Result},
    model::EncoderModel,
    store::{BackendKind, StoreBinding},
    tfidf::TfIdfScorer,
};

/// One raw retrieval match before result normalization.
#[derive(Debug, Clone)]
pub struct RetrievedMatch {
    pub fragment: Fragment,
    /// None when the scoring backend produced no relevance score.
    pub score: Option<f32>,
}

pub enum Retriever {
    Keyword,
    Dense(DenseRetriever),
}

pub struct DenseRetriever {
    query_encoder: EncoderModel,
    passage_encoder: EncoderModel,
    embeddings: EmbeddingDb,
    /// When set, re-score this many first-stage candidates with MaxSim.
    rerank_depth: Option<usize>,
}

impl Retriever {
    /// Execute retrieval for all queries in one batched call.
    ///
    /// Returns one match list per query, in query order. Lists are ranked
    /// best-first by the backend's own ordering.
    pub fn retrieve_batch(
        &mut self,
        store: &StoreBinding,
        queries: &[String],
        top_k: usize,
    ) -> Result<Vec<Vec<RetrievedMatch>>> {
        match self {
            Retriever::Keyword => keyword_batch(store, queries, top_k),
            Retriever::Dense(dense) => dense.batch(store, queries, top_k),
        }
    }

    /// Run the encode stage of indexing. A no-op for lexical retrieval.
    pub fn encode_fragments(&mut self, fragments: &[Fragment]) -> Result<()> {
        match self {
            Retriever::Keyword => Ok(()),
            Retriever::Dense(dense) => dense.encode_fragments(fragments),
        }
    }

    /// Drop all stored fragment embeddings. Called on index clear.
    pub fn clear_encoded(&mut self) -> Result<()> {
        match self {
            Retriever::Keyword => Ok(()),
            Retriever::Dense(dense) => dense.embeddings.clear(),
        }
    }
}

fn keyword_batch(
    store: &StoreBinding,
    queries: &[String],
    top_k: usize,
) -> Result<Vec<Vec<RetrievedMatch>>> {
    match store.backend_kind() {
        BackendKind::Disk => queries
            .iter()
            .map(|query| {
                let hits = store.bm25_search(query, top_k)?;
                Ok(hits
                    .into_iter()
                    .map(|(fragment, score)| RetrievedMatch {
                        fragment,
                        score: Some(score),
                    })
                    .collect())
            })
            .collect(),
        BackendKind::Memory => {
            // One corpus snapshot serves the whole batch.
            let fragments = store.all_fragments()?;
            let scorer = TfIdfScorer::new(&fragments);
            Ok(queries
                .iter()
                .map(|query| {
                    scorer
                        .search(query, top_k)
                        .into_iter()
                        .map(|(fragment, score)| RetrievedMatch {
                            fragment,
                            score: Some(score),
                        })
                        .collect()
                })
                .collect())
        }
    }
}

impl DenseRetriever {
    /// Load both encoders eagerly and open the embedding store.
    pub fn new(
        query_model: &str,
        passage_model: &str,
        embeddings: EmbeddingDb,
        rerank_depth: Option<usize>,
    ) -> Result<Self> {
        let query_encoder = EncoderModel::load(query_model)?;
        let passage_encoder = EncoderModel::load(passage_model)?;
        Ok(Self {
            query_encoder,
            passage_encoder,
            embeddings,
            rerank_depth,
        })
    }

    fn batch(
        &mut self,
        store: &StoreBinding,
        queries: &[String],
        top_k: usize,
    ) -> Result<Vec<Vec<RetrievedMatch>>> {
        let query_tensors = self.query_encoder.encode_queries(queries)?;

        query_tensors
            .iter()
            .map(|query| {
                rank_candidates(
                    query,
                    &self.embeddings,
                    store,
                    top_k,
                    self.rerank_depth,
                )
            })
            .collect()
    }

    fn encode_fragments(&mut self, fragments: &[Fragment]) -> Result<()> {
        if fragments.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> =
            fragments.iter().map(|f| f.content.clone()).collect();
        let embeddings = self.passage_encoder.encode_passages(&texts)?;

        let entries = embedding_entries(fragments, &embeddings)?;
        self.embeddings.batch_store(&entries)
    }
}

/// Flatten a `[B, T, D]` passage embedding tensor into per-fragment store
/// entries keyed by numeric fragment id.
///
/// The batch dimension must match the fragment count; a fragment stored
/// without an embedding would be unreachable to dense retrieval.
fn embedding_entries(
    fragments: &[Fragment],
    embeddings: &Tensor,
) -> Result<Vec<(u64, u32, u32, Vec<f32>)>> {
    let (batch_size, _num_tokens, dimension) = embeddings
        .dims3()
        .map_err(|e| Error::batch("passage encoding", e))?;
    if batch_size != fragments.len() {
        return Err(Error::batch(
            "passage encoding",
            format!(
                "encoder returned {batch_size} embeddings for {} fragments",
                fragments.len()
            ),
        ));
    }

    let mut entries = Vec::with_capacity(batch_size);
    for (i, fragment) in fragments.iter().enumerate() {
        let tensor = embeddings
            .get(i)
            .map_err(|e| Error::batch("passage encoding", e))?;
        let flat = tensor_to_flat_f32(&tensor)?;
        let num_tokens = flat.len() / dimension;
        entries.push((
            fragment.numeric_id,
            num_tokens as u32,
            dimension as u32,
            flat,
        ));
    }
    Ok(entries)
}

/// Rank all embedded fragments against one query.
///
/// First stage: dot product of mean-pooled vectors over every candidate.
/// Optional second stage: MaxSim re-scoring of the top `rerank_depth`
/// candidates, whose ordering replaces the first stage's.
fn rank_candidates(
    query: &Tensor,
    embeddings: &EmbeddingDb,
    store: &StoreBinding,
    top_k: usize,
    rerank_depth: Option<usize>,
) -> Result<Vec<RetrievedMatch>> {
    let query_pooled = pooled_rows(query)?;
    let candidate_ids = embeddings.list_ids()?;

    // Load and score candidates in parallel; skip malformed entries.
    let mut scored: Vec<(u64, f32)> = candidate_ids
        .par_iter()
        .filter_map(|&id| {
            let matrix = embeddings.load(id).ok().flatten()?;
            let score = dot(&query_pooled, &matrix.mean_pooled());
            Some((id, score))
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(depth) = rerank_depth {
        scored.truncate(depth.max(top_k));
        scored = rerank_maxsim(query, &scored, embeddings)?;
    }
    scored.truncate(top_k);

    let mut matches = Vec::with_capacity(scored.len());
    for (id, score) in scored {
        match store.get_by_numeric_id(id)? {
            Some(fragment) => matches.push(RetrievedMatch {
                fragment,
                score: Some(score),
            }),
            None => {
                tracing::debug!(
                    fragment = id,
                    "embedded fragment missing from store, skipping"
                );
            }
        }
    }
    Ok(matches)
}

/// Re-score candidates with MaxSim and return them sorted best-first.
fn rerank_maxsim(
    query: &Tensor,
    candidates: &[(u64, f32)],
    embeddings: &EmbeddingDb,
) -> Result<Vec<(u64, f32)>> {
    let mut ranked: Vec<(u64, f32)> = candidates
        .par_iter()
        .filter_map(|&(id, _)| {
            let matrix = embeddings.load(id).ok().flatten()?;
            let tensor = matrix_to_tensor(&matrix).ok()?;
            let score = maxsim(query, &tensor).ok()?;
            Some((id, score))
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
    });

    Ok(ranked)
}

/// Compute the MaxSim score between query and passage token embeddings.
///
/// query: [Q, D], passage: [T, D].
/// MaxSim = sum over query tokens of max(query_token . passage_token).
fn maxsim(query: &Tensor, passage: &Tensor) -> Result<f32> {
    let sim_matrix = query
        .matmul(&passage.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    let score = row_maxes
        .sum_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)?;

    Ok(score)
}

/// Mean-pool a [N, D] tensor's rows into a D-length vector.
fn pooled_rows(tensor: &Tensor) -> Result<Vec<f32>> {
    let rows: Vec<Vec<f32>> =
        tensor.to_vec2::<f32>().map_err(map_candle_err)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let dim = rows[0].len();
    let mut pooled = vec![0.0f32; dim];
    for row in &rows {
        for (acc, v) in pooled.iter_mut().zip(row) {
            *acc += v;
        }
    }
    for v in &mut pooled {
        *v /= rows.len() as f32;
    }
    Ok(pooled)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Convert a stored embedding matrix into a [T, D] tensor.
fn matrix_to_tensor(matrix: &EmbeddingMatrix) -> Result<Tensor> {
    Tensor::from_vec(
        matrix.data.clone(),
        (matrix.num_tokens as usize, matrix.dimension as usize),
        &candle_core::Device::Cpu,
    )
    .map_err(map_candle_err)
}

fn tensor_to_flat_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    tensor
        .flatten_all()
        .map_err(map_candle_err)?
        .to_vec1::<f32>()
        .map_err(map_candle_err)
}

fn map_candle_err(e: candle_core::Error) -> Error {
    Error::batch("tensor computation", e)
}
