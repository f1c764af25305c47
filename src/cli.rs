use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::{
    document::RawDoc,
    error::{Error, Result},
    extract::TextExtractor,
    pipeline::{PipelineParams, Variant},
};

#[derive(Debug, Parser)]
#[command(
    name = "docpipe",
    about = "Index documents and search them through pluggable pipelines"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the available pipeline variants and their parameters
    Variants {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Index documents into a pipeline's store
    Index(IndexArgs),
    /// Search an indexed pipeline
    Search(SearchArgs),
}

#[derive(Debug, Parser)]
pub struct IndexArgs {
    /// Files to index; media type inferred from the extension
    pub files: Vec<PathBuf>,

    /// Pipeline variant name
    #[arg(short, long, default_value = "Keyword Search")]
    pub pipeline: String,

    /// Override a pipeline parameter (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Index a literal document (repeatable)
    #[arg(long = "text", value_name = "TEXT")]
    pub texts: Vec<String>,

    /// JSON file with an array of {"text": ..., "id": ...} documents
    #[arg(long, value_name = "FILE")]
    pub docs: Option<PathBuf>,

    /// Keep existing index contents instead of clearing them first
    #[arg(long)]
    pub no_clear: bool,

    /// Output the indexed document ids as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// One or more queries, answered as a single batch
    #[arg(required = true)]
    pub queries: Vec<String>,

    /// Pipeline variant name
    #[arg(short, long, default_value = "Keyword Search")]
    pub pipeline: String,

    /// Override a pipeline parameter (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Resolve a variant's parameters from `NAME=VALUE` override strings.
///
/// Values are coerced to the kind of the declared default, so `--param
/// top_k=5` yields an int and `--param audio_output=true` a bool.
pub fn resolve_params(
    variant: Variant,
    overrides: &[String],
) -> Result<PipelineParams> {
    let mut params = PipelineParams::defaults(variant);
    for raw in overrides {
        let Some((name, value)) = raw.split_once('=') else {
            return Err(Error::Config(format!(
                "invalid parameter override `{raw}`, expected NAME=VALUE"
            )));
        };
        let declared = params.get(name).cloned().ok_or_else(|| {
            Error::Config(format!(
                "unknown parameter `{name}` for variant '{}'",
                variant.name()
            ))
        })?;
        params.set(name, declared.parse_same_kind(value)?)?;
    }
    Ok(params)
}

/// Media type inferred from a file extension, if the type is one the
/// extractor can dispatch on.
pub fn media_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" | "md" => Some("text/plain"),
        "csv" => Some("text/csv"),
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "wav" => Some("audio/wav"),
        "mp3" => Some("audio/mpeg"),
        _ => None,
    }
}

/// Gather the documents an `index` invocation names: a JSON batch file,
/// inline texts, and extracted file contents, in that order. Files with
/// unknown or unsupported media types are dropped with a warning.
pub fn gather_documents(
    args: &IndexArgs,
    extractor: &TextExtractor,
) -> Result<Vec<RawDoc>> {
    let mut docs = Vec::new();

    if let Some(path) = &args.docs {
        let file = std::fs::File::open(path)?;
        let batch: Vec<RawDoc> = serde_json::from_reader(file)?;
        docs.extend(batch);
    }

    for text in &args.texts {
        docs.push(RawDoc::new(text.clone(), None));
    }

    for path in &args.files {
        let Some(media_type) = media_type_for(path) else {
            tracing::warn!(file = %path.display(), "unknown media type, skipping");
            continue;
        };
        let bytes = std::fs::read(path)?;
        if let Some(text) = extractor.extract_or_skip(&bytes, media_type)? {
            let id = path.file_stem().map(|s| s.to_string_lossy().into_owned());
            docs.push(RawDoc::new(text, id));
        }
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ParamValue;

    #[test]
    fn overrides_are_coerced_by_declared_kind() {
        let params = resolve_params(
            Variant::Keyword,
            &["top_k=5".into(), "audio_output=true".into()],
        )
        .unwrap();
        assert_eq!(params.get("top_k"), Some(&ParamValue::Int(5)));
        assert_eq!(params.get("audio_output"), Some(&ParamValue::Bool(true)));
    }

    #[test]
    fn malformed_and_unknown_overrides_fail() {
        assert!(resolve_params(Variant::Keyword, &["top_k".into()]).is_err());
        assert!(
            resolve_params(Variant::Keyword, &["rerank_depth=5".into()])
                .is_err()
        );
        assert!(resolve_params(Variant::Keyword, &["top_k=lots".into()]).is_err());
    }

    #[test]
    fn ranker_accepts_depth_override() {
        let params =
            resolve_params(Variant::DenseRanker, &["rerank_depth=5".into()])
                .unwrap();
        assert_eq!(params.get("rerank_depth"), Some(&ParamValue::Int(5)));
    }

    #[test]
    fn media_types_by_extension() {
        assert_eq!(media_type_for(Path::new("a.txt")), Some("text/plain"));
        assert_eq!(media_type_for(Path::new("a.CSV")), Some("text/csv"));
        assert_eq!(media_type_for(Path::new("a.pdf")), Some("application/pdf"));
        assert_eq!(media_type_for(Path::new("a.tar")), None);
        assert_eq!(media_type_for(Path::new("noext")), None);
    }

    #[test]
    fn gather_combines_sources_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let batch = tmp.path().join("docs.json");
        std::fs::write(&batch, r#"[{"text":"from batch","id":"b1"}]"#).unwrap();
        let file = tmp.path().join("note.txt");
        std::fs::write(&file, "from file").unwrap();
        let skipped = tmp.path().join("blob.bin");
        std::fs::write(&skipped, [0u8; 4]).unwrap();

        let args = IndexArgs {
            files: vec![file, skipped],
            pipeline: "Keyword Search".into(),
            params: vec![],
            texts: vec!["inline".into()],
            docs: Some(batch),
            no_clear: false,
            json: false,
        };

        let docs = gather_documents(&args, &TextExtractor::new()).unwrap();
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[0].text, "from batch");
        assert_eq!(docs[0].id.as_deref(), Some("b1"));
        assert_eq!(docs[1].text, "inline");
        assert_eq!(docs[2].text, "from file");
        assert_eq!(docs[2].id.as_deref(), Some("note"));
    }
}
