//! Pipeline selection: keeps at most one live pipeline per selector and
//! rebuilds it only when the requested configuration actually changed.
//!
//! Reselecting the active variant with identical (normalized) parameters
//! returns the existing pipeline, preserving its store binding and loaded
//! models. A failed rebuild leaves the previously active pipeline in place.

use crate::{
    error::Result,
    pipeline::{ParamSpec, Pipeline, PipelineFactory, PipelineParams, Variant},
};

pub struct PipelineSelector {
    factory: PipelineFactory,
    active: Option<ActivePipeline>,
}

struct ActivePipeline {
    variant: Variant,
    /// Normalized parameters the pipeline was built with.
    params: PipelineParams,
    pipeline: Pipeline,
}

impl PipelineSelector {
    pub fn new(factory: PipelineFactory) -> Self {
        Self {
            factory,
            active: None,
        }
    }

    /// Every selectable variant with its declared parameters.
    pub fn list_variants() -> Vec<(&'static str, Vec<ParamSpec>)> {
        Variant::all()
            .into_iter()
            .map(|v| (v.name(), v.param_specs()))
            .collect()
    }

    /// Return the active pipeline, rebuilding it first if the variant or any
    /// normalized parameter value differs from the active configuration.
    ///
    /// `on_rebuild` runs once per actual rebuild, after the new pipeline is
    /// built but before it is handed back; callers use it to reset
    /// session state tied to the previous pipeline. Rebuilding also wipes
    /// the transient audio directory.
    pub fn get_or_build(
        &mut self,
        variant: Variant,
        params: &PipelineParams,
        mut on_rebuild: impl FnMut(),
    ) -> Result<&mut Pipeline> {
        let normalized = params.normalized();

        let unchanged = matches!(
            &self.active,
            Some(a) if a.variant == variant && a.params == normalized
        );

        if unchanged {
            match &mut self.active {
                Some(active) => Ok(&mut active.pipeline),
                None => unreachable!("checked above"),
            }
        } else {
            let pipeline = self.factory.build(variant, &normalized)?;
            tracing::info!(variant = variant.name(), "pipeline (re)built");
            on_rebuild();
            self.factory.data_dir().reset_transient()?;

            let active = self.active.insert(ActivePipeline {
                variant,
                params: normalized,
                pipeline,
            });
            Ok(&mut active.pipeline)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{data_dir::DataDir, pipeline::ParamValue};

    fn selector(tmp: &tempfile::TempDir) -> PipelineSelector {
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        PipelineSelector::new(PipelineFactory::new(data_dir))
    }

    #[test]
    fn lists_all_variants() {
        let variants = PipelineSelector::list_variants();
        let names: Vec<_> = variants.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "Keyword Search",
                "Dense Passage Retrieval",
                "Dense Passage Retrieval Ranker"
            ]
        );
    }

    #[test]
    fn identical_selection_reuses_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut selector = selector(&tmp);
        let params = PipelineParams::defaults(Variant::Keyword);

        let mut rebuilds = 0;
        let first_binding = selector
            .get_or_build(Variant::Keyword, &params, || rebuilds += 1)
            .unwrap()
            .binding_id();
        let second_binding = selector
            .get_or_build(Variant::Keyword, &params, || rebuilds += 1)
            .unwrap()
            .binding_id();

        assert_eq!(first_binding, second_binding);
        assert_eq!(rebuilds, 1);
    }

    #[test]
    fn parameter_change_rebuilds() {
        let tmp = tempfile::tempdir().unwrap();
        let mut selector = selector(&tmp);

        let params = PipelineParams::defaults(Variant::Keyword);
        let mut rebuilds = 0;
        let first = selector
            .get_or_build(Variant::Keyword, &params, || rebuilds += 1)
            .unwrap()
            .binding_id();

        let mut changed = params.clone();
        changed.set("top_k", ParamValue::Int(5)).unwrap();
        let second = selector
            .get_or_build(Variant::Keyword, &changed, || rebuilds += 1)
            .unwrap()
            .binding_id();

        assert_ne!(first, second);
        assert_eq!(rebuilds, 2);
    }

    #[test]
    fn equivalent_normalized_params_do_not_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let mut selector = selector(&tmp);

        // audio_output=false with top_k=10 normalizes identically to the
        // defaults, so requesting it again is a no-op.
        let params = PipelineParams::defaults(Variant::Keyword);
        let mut explicit = params.clone();
        explicit.set("top_k", ParamValue::Int(10)).unwrap();

        let mut rebuilds = 0;
        selector
            .get_or_build(Variant::Keyword, &params, || rebuilds += 1)
            .unwrap();
        selector
            .get_or_build(Variant::Keyword, &explicit, || rebuilds += 1)
            .unwrap();
        assert_eq!(rebuilds, 1);
    }

    #[test]
    fn failed_rebuild_keeps_previous_pipeline() {
        let tmp = tempfile::tempdir().unwrap();
        let mut selector = selector(&tmp);

        let params = PipelineParams::defaults(Variant::Keyword);
        let binding = selector
            .get_or_build(Variant::Keyword, &params, || {})
            .unwrap()
            .binding_id();

        // No synthesizer registered: this build must fail.
        let mut bad = params.clone();
        bad.set("audio_output", ParamValue::Bool(true)).unwrap();
        assert!(selector.get_or_build(Variant::Keyword, &bad, || {}).is_err());

        let after = selector
            .get_or_build(Variant::Keyword, &params, || {})
            .unwrap()
            .binding_id();
        assert_eq!(binding, after);
    }

    #[test]
    fn rebuild_wipes_transient_audio_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let audio_dir = data_dir.audio_dir().unwrap();
        let mut selector = PipelineSelector::new(PipelineFactory::new(data_dir));

        let params = PipelineParams::defaults(Variant::Keyword);
        selector
            .get_or_build(Variant::Keyword, &params, || {})
            .unwrap();

        let leftover = audio_dir.join("stale.wav");
        std::fs::write(&leftover, b"x").unwrap();

        let mut changed = params.clone();
        changed.set("top_k", ParamValue::Int(4)).unwrap();
        selector
            .get_or_build(Variant::Keyword, &changed, || {})
            .unwrap();

        assert!(!leftover.exists());
    }
}
