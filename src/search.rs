//! Search engine: drives a pipeline's read side.
//!
//! All queries in a call go through one batched retrieval. Per query, scores
//! are all-or-nothing: if any match comes back unscored, every record in
//! that query's results is unscored. Scored results are sorted descending
//! with a stable sort, so ties keep their retrieval order.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::{
    document::{ContentType, Fragment},
    error::Result,
    pipeline::Pipeline,
    retriever::RetrievedMatch,
};

/// The fragment-level payload common to every result record.
#[derive(Debug, Clone, Serialize)]
pub struct Hit {
    /// Fragment text; empty for audio content.
    pub text: String,
    /// External id of the owning document.
    pub id: String,
    pub fragment_id: String,
    pub meta: BTreeMap<String, Value>,
}

impl Hit {
    fn from_fragment(fragment: &Fragment) -> Self {
        Self {
            text: fragment.content.clone(),
            id: fragment.external_id.clone(),
            fragment_id: fragment.fragment_id.clone(),
            meta: fragment.meta.clone(),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchRecord {
    ScoredText {
        #[serde(flatten)]
        hit: Hit,
        score: f32,
    },
    UnscoredText {
        #[serde(flatten)]
        hit: Hit,
    },
    Audio {
        #[serde(flatten)]
        hit: Hit,
        path: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<f32>,
    },
}

impl SearchRecord {
    pub fn hit(&self) -> &Hit {
        match self {
            SearchRecord::ScoredText { hit, .. }
            | SearchRecord::UnscoredText { hit }
            | SearchRecord::Audio { hit, .. } => hit,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            SearchRecord::ScoredText { score, .. } => Some(*score),
            SearchRecord::UnscoredText { .. } => None,
            SearchRecord::Audio { score, .. } => *score,
        }
    }
}

/// Run a batch of queries through `pipeline`.
///
/// Returns one ranked record list per query, in query order.
pub fn run_search(
    pipeline: &mut Pipeline,
    queries: &[String],
) -> Result<Vec<Vec<SearchRecord>>> {
    let top_k = pipeline.top_k();
    let batches =
        pipeline
            .retriever
            .retrieve_batch(&pipeline.store, queries, top_k)?;

    let mut results = Vec::with_capacity(batches.len());
    for matches in batches {
        let mut records = normalize_matches(matches);
        if let Some(synth) = &pipeline.synth {
            records = records
                .into_iter()
                .map(|record| attach_audio(record, synth))
                .collect::<Result<_>>()?;
        }
        results.push(records);
    }

    tracing::debug!(
        queries = queries.len(),
        index = pipeline.index_name(),
        "search batch complete"
    );

    Ok(results)
}

/// Apply score normalization and ordering to one query's raw matches.
fn normalize_matches(matches: Vec<RetrievedMatch>) -> Vec<SearchRecord> {
    let all_scored = matches.iter().all(|m| m.score.is_some());

    let mut matches = matches;
    if all_scored {
        // Stable: ties keep retrieval order.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    matches
        .into_iter()
        .map(|m| {
            let score = if all_scored { m.score } else { None };
            to_record(&m.fragment, score)
        })
        .collect()
}

fn to_record(fragment: &Fragment, score: Option<f32>) -> SearchRecord {
    match fragment.content_type {
        ContentType::Audio => {
            let mut hit = Hit::from_fragment(fragment);
            let path = PathBuf::from(std::mem::take(&mut hit.text));
            SearchRecord::Audio { hit, path, score }
        }
        ContentType::Text => match score {
            Some(score) => {
                SearchRecord::ScoredText {
                    hit: Hit::from_fragment(fragment),
                    score,
                }
            }
            None => SearchRecord::UnscoredText {
                hit: Hit::from_fragment(fragment),
            },
        },
    }
}

/// Synthesize a text record's content and convert it to an audio record.
fn attach_audio(
    record: SearchRecord,
    synth: &crate::audio::SynthStage,
) -> Result<SearchRecord> {
    match record {
        SearchRecord::ScoredText { hit, score } => {
            let path = synth.synthesize(&hit.text)?;
            Ok(SearchRecord::Audio {
                hit,
                path,
                score: Some(score),
            })
        }
        SearchRecord::UnscoredText { hit } => {
            let path = synth.synthesize(&hit.text)?;
            Ok(SearchRecord::Audio {
                hit,
                path,
                score: None,
            })
        }
        audio @ SearchRecord::Audio { .. } => Ok(audio),
    }
}
