//! docpipe - document indexing and search through pluggable pipelines.
//!
//! docpipe normalizes heterogeneous inputs (text, CSV, transcribed media)
//! into documents, splits them into retrieval-sized fragments, and serves
//! batched multi-query search through interchangeable pipeline variants:
//! keyword scoring via [Tantivy](https://github.com/quickwit-oss/tantivy)
//! (or TF-IDF when only the in-memory store is available), dense passage
//! retrieval over [ColBERT](https://github.com/stanford-futuredata/ColBERT)
//! embeddings, and dense retrieval with MaxSim re-ranking. Results can
//! optionally be synthesized to audio.
//!
//! # Quick start
//!
//! ```no_run
//! use docpipe::{DataDir, PipelineFactory, PipelineSelector, RawDoc};
//! use docpipe::pipeline::{PipelineParams, Variant};
//! use docpipe::{index::run_index, search::run_search};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let factory = PipelineFactory::new(data_dir);
//! let mut selector = PipelineSelector::new(factory);
//!
//! let params = PipelineParams::defaults(Variant::Keyword);
//! let pipeline = selector
//!     .get_or_build(Variant::Keyword, &params, || {})
//!     .unwrap();
//!
//! let docs = vec![
//!     RawDoc::new("The cat sat on the mat", Some("1".into())),
//!     RawDoc::new("Dogs are great pets", Some("2".into())),
//! ];
//! run_index(pipeline, &docs, true).unwrap();
//!
//! let results = run_search(pipeline, &["cat".to_string()]).unwrap();
//! for record in &results[0] {
//!     println!("{}: {}", record.hit().id, record.hit().text);
//! }
//! ```

pub mod audio;
pub mod cli;
pub mod data_dir;
pub mod document;
pub mod embedding_db;
pub mod error;
pub mod extract;
pub mod index;
pub mod model;
pub mod pipeline;
pub mod retriever;
pub mod search;
pub mod selector;
pub mod splitter;
pub mod store;
pub mod tfidf;

pub use data_dir::DataDir;
pub use document::{Document, Fragment, RawDoc};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineFactory};
pub use search::{Hit, SearchRecord};
pub use selector::PipelineSelector;
pub use store::StoreBinding;
