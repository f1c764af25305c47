//! Document store adapter: one binding per index name, over two
//! interchangeable backends.
//!
//! The disk backend is a Tantivy index that persists beyond the process and
//! provides BM25 scoring. Binding always tries it first; after one retried
//! attempt (with a fixed ramp-up wait) the binding degrades to an in-memory
//! backend. The degradation is logged and otherwise invisible to callers,
//! except that keyword scoring must pick TF-IDF instead of BM25 to stay
//! consistent with the bound backend.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use serde_json::Value;
use tantivy::schema::Value as _;
use tantivy::{
    Index,
    IndexReader,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::QueryParser,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::{
    data_dir::DataDir,
    document::{ContentType, Fragment},
    error::{Error, Result},
};

/// Fixed wait before the single retried disk-binding attempt.
pub const RAMP_UP_WAIT: Duration = Duration::from_secs(2);

const WRITER_MEMORY_BUDGET: usize = 15_000_000;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Field names used in the disk schema.
mod fields {
    pub const FRAGMENT_ID: &str = "fragment_id";
    pub const NUMERIC_ID: &str = "numeric_id";
    pub const DOC_ID: &str = "doc_id";
    pub const PARENT_ID: &str = "parent_id";
    pub const SPLIT_ID: &str = "split_id";
    pub const CONTENT: &str = "content";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const META: &str = "meta";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// On-disk Tantivy index; BM25 keyword scoring.
    Disk,
    /// Process-lifetime fallback; TF-IDF keyword scoring.
    Memory,
}

/// The association between an index name and a concrete backend instance.
pub struct StoreBinding {
    index_name: String,
    binding_id: u64,
    backend: StoreBackend,
}

enum StoreBackend {
    Disk(DiskStore),
    Memory(MemoryStore),
}

impl StoreBinding {
    /// Bind the given index name, preferring the disk backend.
    pub fn bind(data_dir: &DataDir, index_name: &str) -> Self {
        Self::bind_with_retry_wait(data_dir, index_name, RAMP_UP_WAIT)
    }

    /// Like [`StoreBinding::bind`] with an explicit ramp-up wait.
    pub fn bind_with_retry_wait(
        data_dir: &DataDir,
        index_name: &str,
        wait: Duration,
    ) -> Self {
        match Self::try_bind_disk(data_dir, index_name) {
            Ok(store) => Self::with_backend(index_name, StoreBackend::Disk(store)),
            Err(first) => {
                tracing::warn!(
                    index = index_name,
                    error = %first,
                    "disk store binding failed, retrying after ramp-up wait"
                );
                std::thread::sleep(wait);
                match Self::try_bind_disk(data_dir, index_name) {
                    Ok(store) => {
                        Self::with_backend(index_name, StoreBackend::Disk(store))
                    }
                    Err(second) => {
                        let degraded = Error::StoreUnreachable {
                            index: index_name.to_string(),
                            reason: second.to_string(),
                        };
                        tracing::warn!(
                            index = index_name,
                            error = %degraded,
                            "falling back to in-memory document store"
                        );
                        Self::in_memory(index_name)
                    }
                }
            }
        }
    }

    /// Bind an in-memory store directly, skipping the disk attempt.
    pub fn in_memory(index_name: &str) -> Self {
        Self::with_backend(
            index_name,
            StoreBackend::Memory(MemoryStore::default()),
        )
    }

    fn with_backend(index_name: &str, backend: StoreBackend) -> Self {
        Self {
            index_name: index_name.to_string(),
            binding_id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            backend,
        }
    }

    fn try_bind_disk(data_dir: &DataDir, index_name: &str) -> Result<DiskStore> {
        let dir = data_dir.index_dir(index_name)?;
        DiskStore::open(&dir)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Identity of this binding, stable for its lifetime. Two binds of the
    /// same index name produce distinct ids.
    pub fn binding_id(&self) -> u64 {
        self.binding_id
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            StoreBackend::Disk(_) => BackendKind::Disk,
            StoreBackend::Memory(_) => BackendKind::Memory,
        }
    }

    /// Insert a batch of fragments in one commit.
    ///
    /// Fragments with an already-present fragment id are replaced.
    pub fn write_fragments(&mut self, fragments: &[Fragment]) -> Result<()> {
        if fragments.is_empty() {
            return Ok(());
        }
        match &mut self.backend {
            StoreBackend::Disk(store) => store.write(fragments),
            StoreBackend::Memory(store) => {
                store.write(fragments);
                Ok(())
            }
        }
    }

    /// Delete every fragment under this binding's index name. Hard reset.
    pub fn clear(&mut self) -> Result<()> {
        match &mut self.backend {
            StoreBackend::Disk(store) => store.clear(),
            StoreBackend::Memory(store) => {
                store.fragments.clear();
                Ok(())
            }
        }
    }

    pub fn count(&self) -> Result<u64> {
        match &self.backend {
            StoreBackend::Disk(store) => store.count(),
            StoreBackend::Memory(store) => Ok(store.fragments.len() as u64),
        }
    }

    /// All fragments under this binding. Drives the TF-IDF scorer.
    ///
    /// Ordering follows the backend: insertion order on the memory backend,
    /// unspecified on disk.
    pub fn all_fragments(&self) -> Result<Vec<Fragment>> {
        match &self.backend {
            StoreBackend::Disk(store) => store.all(),
            StoreBackend::Memory(store) => Ok(store.fragments.clone()),
        }
    }

    /// Look up one fragment by its numeric id.
    pub fn get_by_numeric_id(&self, numeric_id: u64) -> Result<Option<Fragment>> {
        match &self.backend {
            StoreBackend::Disk(store) => store.get_by_numeric_id(numeric_id),
            StoreBackend::Memory(store) => Ok(store
                .fragments
                .iter()
                .find(|f| f.numeric_id == numeric_id)
                .cloned()),
        }
    }

    /// BM25 search. Only valid when the disk backend is bound; the keyword
    /// retriever checks [`StoreBinding::backend_kind`] first.
    pub fn bm25_search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(Fragment, f32)>> {
        match &self.backend {
            StoreBackend::Disk(store) => store.search(query, limit),
            StoreBackend::Memory(_) => Err(Error::Config(
                "BM25 search requires the disk store backend".into(),
            )),
        }
    }
}

impl std::fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBinding")
            .field("index_name", &self.index_name)
            .field("binding_id", &self.binding_id)
            .field("backend", &self.backend_kind())
            .finish()
    }
}

#[derive(Default)]
struct MemoryStore {
    fragments: Vec<Fragment>,
}

impl MemoryStore {
    fn write(&mut self, fragments: &[Fragment]) {
        let incoming: HashSet<&str> =
            fragments.iter().map(|f| f.fragment_id.as_str()).collect();
        self.fragments
            .retain(|f| !incoming.contains(f.fragment_id.as_str()));
        self.fragments.extend_from_slice(fragments);
    }
}

/// Resolved field handles for the disk schema.
#[derive(Clone, Copy)]
struct SchemaFields {
    fragment_id: Field,
    numeric_id: Field,
    doc_id: Field,
    parent_id: Field,
    split_id: Field,
    content: Field,
    content_type: Field,
    meta: Field,
}

struct DiskStore {
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let fragment_id =
        builder.add_text_field(fields::FRAGMENT_ID, STRING | STORED);
    let numeric_id =
        builder.add_u64_field(fields::NUMERIC_ID, INDEXED | STORED | FAST);
    let doc_id = builder.add_text_field(fields::DOC_ID, STRING | STORED);
    let parent_id = builder.add_text_field(fields::PARENT_ID, STRING | STORED);
    let split_id = builder.add_u64_field(fields::SPLIT_ID, STORED);

    let content_opts = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("en_stem")
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();
    let content = builder.add_text_field(fields::CONTENT, content_opts);

    let content_type =
        builder.add_text_field(fields::CONTENT_TYPE, STRING | STORED);
    let meta =
        builder.add_text_field(fields::META, TextOptions::default().set_stored());

    let schema = builder.build();
    let schema_fields = SchemaFields {
        fragment_id,
        numeric_id,
        doc_id,
        parent_id,
        split_id,
        content,
        content_type,
        meta,
    };

    (schema, schema_fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register("en_stem", en_stem);
}

impl DiskStore {
    fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            Index::create(
                mmap_dir,
                schema.clone(),
                tantivy::IndexSettings::default(),
            )?
        };

        register_tokenizers(&index);
        let reader = index.reader()?;

        Ok(Self {
            index,
            reader,
            fields,
        })
    }

    fn fields(&self) -> SchemaFields {
        self.fields
    }

    fn write(&mut self, fragments: &[Fragment]) -> Result<()> {
        let f = self.fields();
        let mut writer: tantivy::IndexWriter =
            self.index.writer(WRITER_MEMORY_BUDGET)?;

        for fragment in fragments {
            let term = tantivy::Term::from_field_text(
                f.fragment_id,
                &fragment.fragment_id,
            );
            writer.delete_term(term);

            let content_type = match fragment.content_type {
                ContentType::Text => "text",
                ContentType::Audio => "audio",
            };
            let meta = serde_json::to_string(&fragment.meta)?;

            writer.add_document(doc!(
                f.fragment_id => fragment.fragment_id.as_str(),
                f.numeric_id => fragment.numeric_id,
                f.doc_id => fragment.external_id.as_str(),
                f.parent_id => fragment.parent_id.as_str(),
                f.split_id => fragment.split_id as u64,
                f.content => fragment.content.as_str(),
                f.content_type => content_type,
                f.meta => meta,
            ))?;
        }

        writer.commit()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        let mut writer: tantivy::IndexWriter =
            self.index.writer(WRITER_MEMORY_BUDGET)?;
        writer.delete_all_documents()?;
        writer.commit()?;
        Ok(())
    }

    fn count(&self) -> Result<u64> {
        self.reader.reload()?;
        Ok(self.reader.searcher().num_docs())
    }

    fn search(&self, query_str: &str, limit: usize) -> Result<Vec<(Fragment, f32)>> {
        // TopDocs::with_limit panics below 1.
        if limit == 0 {
            return Ok(Vec::new());
        }

        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let parser = QueryParser::for_index(&self.index, vec![f.content]);
        let (query, _errors) = parser.parse_query_lenient(query_str);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push((self.to_fragment(&doc, f), score));
        }

        Ok(results)
    }

    fn get_by_numeric_id(&self, numeric_id: u64) -> Result<Option<Fragment>> {
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let term = tantivy::Term::from_field_u64(f.numeric_id, numeric_id);
        let query =
            tantivy::query::TermQuery::new(term, IndexRecordOption::Basic);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(1))?;

        match top_docs.first() {
            Some((_, addr)) => {
                let doc: TantivyDocument = searcher.doc(*addr)?;
                Ok(Some(self.to_fragment(&doc, f)))
            }
            None => Ok(None),
        }
    }

    fn all(&self) -> Result<Vec<Fragment>> {
        let f = self.fields();
        self.reader.reload()?;
        let searcher = self.reader.searcher();

        let query = tantivy::query::AllQuery;
        let limit = searcher.num_docs().max(1) as usize;
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (_, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            results.push(self.to_fragment(&doc, f));
        }
        Ok(results)
    }

    fn to_fragment(&self, doc: &TantivyDocument, f: SchemaFields) -> Fragment {
        let meta: BTreeMap<String, Value> =
            serde_json::from_str(&extract_text(doc, f.meta)).unwrap_or_default();
        let content_type = match extract_text(doc, f.content_type).as_str() {
            "audio" => ContentType::Audio,
            _ => ContentType::Text,
        };

        Fragment {
            fragment_id: extract_text(doc, f.fragment_id),
            numeric_id: extract_u64(doc, f.numeric_id),
            parent_id: extract_text(doc, f.parent_id),
            external_id: extract_text(doc, f.doc_id),
            split_id: extract_u64(doc, f.split_id) as usize,
            content: extract_text(doc, f.content),
            content_type,
            meta,
        }
    }
}

fn extract_text(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::{RawDoc, normalize},
        splitter::Splitter,
    };

    fn fragments_for(texts: &[(&str, &str)]) -> Vec<Fragment> {
        let raw: Vec<RawDoc> = texts
            .iter()
            .map(|(text, id)| RawDoc::new(*text, Some((*id).to_string())))
            .collect();
        let (docs, _) = normalize(&raw);
        let splitter = Splitter::default();
        docs.iter().flat_map(|d| splitter.split(d)).collect()
    }

    fn disk_binding(dir: &Path, index: &str) -> StoreBinding {
        let data_dir = DataDir::resolve(Some(dir)).unwrap();
        StoreBinding::bind_with_retry_wait(
            &data_dir,
            index,
            Duration::from_millis(1),
        )
    }

    #[test]
    fn disk_backend_preferred_when_available() {
        let tmp = tempfile::tempdir().unwrap();
        let binding = disk_binding(tmp.path(), "documents");
        assert_eq!(binding.backend_kind(), BackendKind::Disk);
    }

    #[test]
    fn write_search_and_count() {
        let tmp = tempfile::tempdir().unwrap();
        let mut binding = disk_binding(tmp.path(), "documents");

        let fragments = fragments_for(&[
            ("The cat sat on the mat", "1"),
            ("Dogs are great pets", "2"),
        ]);
        binding.write_fragments(&fragments).unwrap();

        assert_eq!(binding.count().unwrap(), 2);

        let results = binding.bm25_search("cat", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.external_id, "1");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn clear_is_scoped_to_one_index() {
        let tmp = tempfile::tempdir().unwrap();
        let mut docs = disk_binding(tmp.path(), "documents");
        let mut docs_v2 = disk_binding(tmp.path(), "documents_v2");

        docs.write_fragments(&fragments_for(&[("hello world", "1")]))
            .unwrap();
        docs_v2
            .write_fragments(&fragments_for(&[("other corpus", "2")]))
            .unwrap();

        docs_v2.clear().unwrap();

        assert_eq!(docs.count().unwrap(), 1);
        assert_eq!(docs_v2.count().unwrap(), 0);
    }

    #[test]
    fn disk_store_persists_across_bindings() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let mut binding = disk_binding(tmp.path(), "documents");
            binding
                .write_fragments(&fragments_for(&[("persistent data", "1")]))
                .unwrap();
        }
        {
            let binding = disk_binding(tmp.path(), "documents");
            assert_eq!(binding.count().unwrap(), 1);
            let results = binding.bm25_search("persistent", 10).unwrap();
            assert_eq!(results[0].0.external_id, "1");
        }
    }

    #[test]
    fn memory_backend_round_trip() {
        let mut binding = StoreBinding::in_memory("documents");
        assert_eq!(binding.backend_kind(), BackendKind::Memory);

        let fragments = fragments_for(&[("hello", "1"), ("world", "2")]);
        binding.write_fragments(&fragments).unwrap();

        assert_eq!(binding.count().unwrap(), 2);
        let all = binding.all_fragments().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].external_id, "1");
        assert_eq!(all[1].external_id, "2");

        binding.clear().unwrap();
        assert_eq!(binding.count().unwrap(), 0);
    }

    #[test]
    fn zero_limit_search_returns_no_results() {
        let tmp = tempfile::tempdir().unwrap();
        let mut binding = disk_binding(tmp.path(), "documents");

        binding
            .write_fragments(&fragments_for(&[("the cat sat", "1")]))
            .unwrap();

        let results = binding.bm25_search("cat", 0).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn memory_backend_rejects_bm25() {
        let binding = StoreBinding::in_memory("documents");
        assert!(binding.bm25_search("anything", 10).is_err());
    }

    #[test]
    fn rewrite_replaces_same_fragment_id() {
        let tmp = tempfile::tempdir().unwrap();
        let mut binding = disk_binding(tmp.path(), "documents");

        let mut fragments = fragments_for(&[("original content", "1")]);
        binding.write_fragments(&fragments).unwrap();

        fragments[0].content = "updated content".to_string();
        binding.write_fragments(&fragments).unwrap();

        assert_eq!(binding.count().unwrap(), 1);
        let results = binding.bm25_search("updated", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn get_by_numeric_id_finds_fragment() {
        let tmp = tempfile::tempdir().unwrap();
        let mut binding = disk_binding(tmp.path(), "documents");

        let fragments = fragments_for(&[("findable text", "1")]);
        let id = fragments[0].numeric_id;
        binding.write_fragments(&fragments).unwrap();

        let found = binding.get_by_numeric_id(id).unwrap().unwrap();
        assert_eq!(found.fragment_id, fragments[0].fragment_id);
        assert_eq!(found.external_id, "1");
        assert_eq!(found.meta.get("id"), Some(&Value::from("1")));

        assert!(binding.get_by_numeric_id(id ^ 1).unwrap().is_none());
    }

    #[test]
    fn falls_back_to_memory_when_disk_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        // Occupy the index directory path with a file so the disk store
        // cannot create it.
        let indexes = tmp.path().join("indexes");
        std::fs::create_dir_all(&indexes).unwrap();
        std::fs::write(indexes.join("documents"), b"not a directory").unwrap();

        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let binding = StoreBinding::bind_with_retry_wait(
            &data_dir,
            "documents",
            Duration::from_millis(1),
        );

        assert_eq!(binding.backend_kind(), BackendKind::Memory);
    }

    #[test]
    fn binding_ids_are_unique() {
        let a = StoreBinding::in_memory("documents");
        let b = StoreBinding::in_memory("documents");
        assert_ne!(a.binding_id(), b.binding_id());
    }
}
