//! Pipeline variants, parameter schemas, and the factory that builds
//! runnable pipelines.
//!
//! Each variant declares its parameters statically; a parameter's kind is
//! fixed by its declared default, and assignments of a different kind are
//! rejected before any pipeline is built. `audio_output=true` always forces
//! `top_k` to 3 so the playback stage stays bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    audio::{SpeechSynthesizer, SynthStage},
    data_dir::DataDir,
    embedding_db::EmbeddingDb,
    error::{Error, Result},
    model::{DEFAULT_PASSAGE_MODEL, DEFAULT_QUERY_MODEL},
    retriever::{DenseRetriever, Retriever},
    splitter::Splitter,
    store::StoreBinding,
};

/// Number of results a pipeline with audio playback is clamped to.
const AUDIO_TOP_K: i64 = 3;

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Str(_) => "string",
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
        }
    }

    /// Parse `raw` as the same kind as `self`.
    pub fn parse_same_kind(&self, raw: &str) -> Result<ParamValue> {
        let parsed = match self {
            ParamValue::Str(_) => Some(ParamValue::Str(raw.to_string())),
            ParamValue::Bool(_) => raw.parse().ok().map(ParamValue::Bool),
            ParamValue::Int(_) => raw.parse().ok().map(ParamValue::Int),
            ParamValue::Float(_) => raw.parse().ok().map(ParamValue::Float),
        };
        parsed.ok_or_else(|| {
            Error::Config(format!("expected a {} value, got `{raw}`", self.kind()))
        })
    }
}

/// One declared parameter: its name and its default (which fixes the kind).
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub default: ParamValue,
}

/// The available pipeline variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Keyword,
    Dense,
    DenseRanker,
}

impl Variant {
    pub fn all() -> [Variant; 3] {
        [Variant::Keyword, Variant::Dense, Variant::DenseRanker]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Variant::Keyword => "Keyword Search",
            Variant::Dense => "Dense Passage Retrieval",
            Variant::DenseRanker => "Dense Passage Retrieval Ranker",
        }
    }

    pub fn from_name(name: &str) -> Result<Variant> {
        Variant::all()
            .into_iter()
            .find(|v| v.name() == name)
            .ok_or_else(|| Error::NotFound {
                kind: "pipeline variant",
                name: name.to_string(),
            })
    }

    /// The parameters this variant accepts, with their defaults.
    pub fn param_specs(&self) -> Vec<ParamSpec> {
        let mut specs = vec![
            ParamSpec {
                name: "index",
                default: ParamValue::Str("documents".into()),
            },
            ParamSpec {
                name: "top_k",
                default: ParamValue::Int(10),
            },
            ParamSpec {
                name: "audio_output",
                default: ParamValue::Bool(false),
            },
        ];

        if matches!(self, Variant::Dense | Variant::DenseRanker) {
            specs.push(ParamSpec {
                name: "query_model",
                default: ParamValue::Str(DEFAULT_QUERY_MODEL.into()),
            });
            specs.push(ParamSpec {
                name: "passage_model",
                default: ParamValue::Str(DEFAULT_PASSAGE_MODEL.into()),
            });
        }

        if matches!(self, Variant::DenseRanker) {
            specs.push(ParamSpec {
                name: "rerank_depth",
                default: ParamValue::Int(50),
            });
        }

        specs
    }
}

/// A validated parameter assignment for one variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineParams {
    values: BTreeMap<&'static str, ParamValue>,
}

impl PipelineParams {
    pub fn defaults(variant: Variant) -> Self {
        let values = variant
            .param_specs()
            .into_iter()
            .map(|spec| (spec.name, spec.default))
            .collect();
        Self { values }
    }

    /// Override one parameter. The name must be declared by the variant and
    /// the value's kind must match the declared default's kind.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        let Some((key, current)) = self.values.get_key_value(name) else {
            return Err(Error::Config(format!("unknown parameter `{name}`")));
        };
        if current.kind() != value.kind() {
            return Err(Error::Config(format!(
                "parameter `{name}` expects a {} value, got {}",
                current.kind(),
                value.kind()
            )));
        }
        let key = *key;
        self.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    /// Apply cross-parameter rules: audio playback caps `top_k` at 3.
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.bool_value("audio_output").unwrap_or(false) {
            out.values.insert("top_k", ParamValue::Int(AUDIO_TOP_K));
        }
        out
    }

    fn str_value(&self, name: &str) -> Result<String> {
        match self.values.get(name) {
            Some(ParamValue::Str(s)) => Ok(s.clone()),
            _ => Err(Error::Config(format!("missing string parameter `{name}`"))),
        }
    }

    fn int_value(&self, name: &str) -> Result<i64> {
        match self.values.get(name) {
            Some(ParamValue::Int(i)) => Ok(*i),
            _ => Err(Error::Config(format!("missing int parameter `{name}`"))),
        }
    }

    fn bool_value(&self, name: &str) -> Result<bool> {
        match self.values.get(name) {
            Some(ParamValue::Bool(b)) => Ok(*b),
            _ => Err(Error::Config(format!("missing bool parameter `{name}`"))),
        }
    }
}

/// Builds runnable pipelines from a variant plus parameters.
pub struct PipelineFactory {
    data_dir: DataDir,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
}

impl PipelineFactory {
    pub fn new(data_dir: DataDir) -> Self {
        Self {
            data_dir,
            synthesizer: None,
        }
    }

    pub fn with_synthesizer(
        mut self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    /// Build a pipeline. Model loads happen here, so a missing or broken
    /// encoder fails the build rather than the first search.
    pub fn build(
        &self,
        variant: Variant,
        params: &PipelineParams,
    ) -> Result<Pipeline> {
        let params = params.normalized();

        let index_name = params.str_value("index")?;
        let top_k = params.int_value("top_k")?.max(0) as usize;
        let audio_output = params.bool_value("audio_output")?;

        let synth = if audio_output {
            let synthesizer =
                self.synthesizer.clone().ok_or(Error::ModelUnavailable {
                    model: "speech synthesizer".into(),
                    reason: "no synthesizer registered with this factory".into(),
                })?;
            Some(SynthStage::new(synthesizer, self.data_dir.audio_dir()?))
        } else {
            None
        };

        let store = StoreBinding::bind(&self.data_dir, &index_name);

        let retriever = match variant {
            Variant::Keyword => Retriever::Keyword,
            Variant::Dense | Variant::DenseRanker => {
                let query_model = params.str_value("query_model")?;
                let passage_model = params.str_value("passage_model")?;
                let embeddings = EmbeddingDb::open(
                    &self.data_dir.embeddings_db(&index_name)?,
                )?;
                let rerank_depth = match variant {
                    Variant::DenseRanker => {
                        Some(params.int_value("rerank_depth")?.max(1) as usize)
                    }
                    _ => None,
                };
                Retriever::Dense(DenseRetriever::new(
                    &query_model,
                    &passage_model,
                    embeddings,
                    rerank_depth,
                )?)
            }
        };

        tracing::info!(
            variant = variant.name(),
            index = %index_name,
            top_k,
            "pipeline built"
        );

        Ok(Pipeline {
            variant,
            index_name,
            top_k,
            store,
            splitter: Splitter::default(),
            retriever,
            synth,
        })
    }
}

/// A runnable two-stage pipeline: one store binding shared by the indexing
/// and search sides, one retriever, one splitter.
pub struct Pipeline {
    variant: Variant,
    index_name: String,
    top_k: usize,
    pub(crate) store: StoreBinding,
    pub(crate) splitter: Splitter,
    pub(crate) retriever: Retriever,
    pub(crate) synth: Option<SynthStage>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("variant", &self.variant)
            .field("index_name", &self.index_name)
            .field("top_k", &self.top_k)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Identity of the underlying store binding; unchanged as long as the
    /// same pipeline instance is reused.
    pub fn binding_id(&self) -> u64 {
        self.store.binding_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stub::StubSynthesizer;

    fn factory(tmp: &tempfile::TempDir) -> PipelineFactory {
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        PipelineFactory::new(data_dir)
    }

    #[test]
    fn variant_names_round_trip() {
        for variant in Variant::all() {
            assert_eq!(Variant::from_name(variant.name()).unwrap(), variant);
        }
        assert!(Variant::from_name("BM42").is_err());
    }

    #[test]
    fn keyword_defaults() {
        let params = PipelineParams::defaults(Variant::Keyword);
        assert_eq!(
            params.get("index"),
            Some(&ParamValue::Str("documents".into()))
        );
        assert_eq!(params.get("top_k"), Some(&ParamValue::Int(10)));
        assert_eq!(params.get("audio_output"), Some(&ParamValue::Bool(false)));
        assert!(params.get("query_model").is_none());
    }

    #[test]
    fn ranker_declares_model_and_depth_params() {
        let params = PipelineParams::defaults(Variant::DenseRanker);
        assert!(params.get("query_model").is_some());
        assert!(params.get("passage_model").is_some());
        assert_eq!(params.get("rerank_depth"), Some(&ParamValue::Int(50)));
    }

    #[test]
    fn set_rejects_unknown_names_and_kind_mismatches() {
        let mut params = PipelineParams::defaults(Variant::Keyword);
        assert!(params.set("nope", ParamValue::Int(1)).is_err());
        assert!(params.set("top_k", ParamValue::Str("ten".into())).is_err());
        params.set("top_k", ParamValue::Int(5)).unwrap();
        assert_eq!(params.get("top_k"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn audio_output_forces_top_k_three() {
        let mut params = PipelineParams::defaults(Variant::Keyword);
        params.set("top_k", ParamValue::Int(25)).unwrap();
        params.set("audio_output", ParamValue::Bool(true)).unwrap();

        let normalized = params.normalized();
        assert_eq!(normalized.get("top_k"), Some(&ParamValue::Int(3)));

        // Without audio playback the requested value stands.
        params.set("audio_output", ParamValue::Bool(false)).unwrap();
        assert_eq!(params.normalized().get("top_k"), Some(&ParamValue::Int(25)));
    }

    #[test]
    fn parse_same_kind_coerces_by_default_kind() {
        let spec = ParamValue::Int(10);
        assert_eq!(spec.parse_same_kind("42").unwrap(), ParamValue::Int(42));
        assert!(spec.parse_same_kind("many").is_err());

        let spec = ParamValue::Bool(false);
        assert_eq!(
            spec.parse_same_kind("true").unwrap(),
            ParamValue::Bool(true)
        );
    }

    #[test]
    fn keyword_pipeline_builds_without_models() {
        let tmp = tempfile::tempdir().unwrap();
        let params = PipelineParams::defaults(Variant::Keyword);
        let pipeline = factory(&tmp).build(Variant::Keyword, &params).unwrap();

        assert_eq!(pipeline.variant(), Variant::Keyword);
        assert_eq!(pipeline.index_name(), "documents");
        assert_eq!(pipeline.top_k(), 10);
        assert!(pipeline.synth.is_none());
    }

    #[test]
    fn audio_output_without_synthesizer_fails_build() {
        let tmp = tempfile::tempdir().unwrap();
        let mut params = PipelineParams::defaults(Variant::Keyword);
        params.set("audio_output", ParamValue::Bool(true)).unwrap();

        let err = factory(&tmp).build(Variant::Keyword, &params).unwrap_err();
        assert!(matches!(err, Error::ModelUnavailable { .. }));
    }

    #[test]
    fn audio_output_with_synthesizer_clamps_top_k() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = factory(&tmp).with_synthesizer(Arc::new(StubSynthesizer));

        let mut params = PipelineParams::defaults(Variant::Keyword);
        params.set("audio_output", ParamValue::Bool(true)).unwrap();
        params.set("top_k", ParamValue::Int(20)).unwrap();

        let pipeline = factory.build(Variant::Keyword, &params).unwrap();
        assert_eq!(pipeline.top_k(), 3);
        assert!(pipeline.synth.is_some());
    }
}
