use std::{
    collections::{BTreeMap, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw input record handed to the core by an extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDoc {
    pub text: String,
    /// Caller-supplied identifier. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
}

impl RawDoc {
    pub fn new(text: impl Into<String>, id: Option<String>) -> Self {
        Self {
            text: text.into(),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Audio,
}

/// The canonical indexed unit produced by [`normalize`].
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub content_type: ContentType,
    /// Store primary key. Freshly generated on every normalization, so it
    /// never collides across calls even when callers reuse external ids.
    pub internal_id: String,
    /// Caller-visible identifier, kept in meta for result correlation.
    pub external_id: String,
    pub meta: BTreeMap<String, Value>,
}

/// A sub-span of a [`Document`] produced by splitting.
///
/// Fragments, not whole documents, are the unit scored and returned by a
/// search.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub fragment_id: String,
    /// Hash of `fragment_id`, used as the embedding store key.
    pub numeric_id: u64,
    /// `internal_id` of the owning document.
    pub parent_id: String,
    /// `external_id` of the owning document.
    pub external_id: String,
    /// Zero-based split ordinal within the owning document.
    pub split_id: usize,
    pub content: String,
    pub content_type: ContentType,
    pub meta: BTreeMap<String, Value>,
}

impl Fragment {
    pub fn new(parent: &Document, split_id: usize, content: String) -> Self {
        let fragment_id = uuid::Uuid::new_v4().to_string();
        let numeric_id = numeric_fragment_id(&fragment_id);

        let mut meta = parent.meta.clone();
        meta.insert("parent_id".into(), Value::from(parent.internal_id.clone()));
        meta.insert("_split_id".into(), Value::from(split_id as u64));

        Self {
            fragment_id,
            numeric_id,
            parent_id: parent.internal_id.clone(),
            external_id: parent.external_id.clone(),
            split_id,
            content,
            content_type: parent.content_type,
            meta,
        }
    }
}

/// Derive the numeric fragment id used to key embeddings and deduplicate
/// store entries.
pub fn numeric_fragment_id(fragment_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    fragment_id.hash(&mut hasher);
    hasher.finish()
}

/// Normalize raw input records into canonical documents.
///
/// Returns the documents and their external ids, both in input order. Records
/// without a caller-supplied id get a generated UUID; every record gets a
/// fresh internal id regardless of input.
pub fn normalize(raw_docs: &[RawDoc]) -> (Vec<Document>, Vec<String>) {
    let mut documents = Vec::with_capacity(raw_docs.len());
    let mut external_ids = Vec::with_capacity(raw_docs.len());

    for raw in raw_docs {
        let external_id = raw
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let internal_id = uuid::Uuid::new_v4().to_string();

        let mut meta = BTreeMap::new();
        meta.insert("id".to_string(), Value::from(external_id.clone()));

        documents.push(Document {
            content: raw.text.clone(),
            content_type: ContentType::Text,
            internal_id,
            external_id: external_id.clone(),
            meta,
        });
        external_ids.push(external_id);
    }

    (documents, external_ids)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn normalize_preserves_length_and_order() {
        let raw = vec![
            RawDoc::new("first", Some("1".into())),
            RawDoc::new("second", Some("2".into())),
            RawDoc::new("third", Some("3".into())),
        ];

        let (docs, ids) = normalize(&raw);

        assert_eq!(docs.len(), 3);
        assert_eq!(ids, vec!["1", "2", "3"]);
        assert_eq!(docs[0].content, "first");
        assert_eq!(docs[2].content, "third");
    }

    #[test]
    fn normalize_empty_input() {
        let (docs, ids) = normalize(&[]);
        assert!(docs.is_empty());
        assert!(ids.is_empty());
    }

    #[test]
    fn missing_ids_are_generated_and_unique() {
        let raw: Vec<RawDoc> =
            (0..50).map(|_| RawDoc::new("text", None)).collect();

        let (_, ids) = normalize(&raw);

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 50);
    }

    #[test]
    fn internal_ids_never_collide_across_calls() {
        let raw = vec![RawDoc::new("text", Some("same".into()))];

        let (a, _) = normalize(&raw);
        let (b, _) = normalize(&raw);

        assert_eq!(a[0].external_id, b[0].external_id);
        assert_ne!(a[0].internal_id, b[0].internal_id);
    }

    #[test]
    fn meta_carries_external_id() {
        let raw = vec![RawDoc::new("text", Some("42".into()))];
        let (docs, _) = normalize(&raw);
        assert_eq!(docs[0].meta.get("id"), Some(&Value::from("42")));
    }

    #[test]
    fn fragment_links_back_to_parent() {
        let raw = vec![RawDoc::new("some text", Some("7".into()))];
        let (docs, _) = normalize(&raw);

        let frag = Fragment::new(&docs[0], 2, "some".to_string());

        assert_eq!(frag.parent_id, docs[0].internal_id);
        assert_eq!(frag.external_id, "7");
        assert_eq!(frag.split_id, 2);
        assert_eq!(
            frag.meta.get("parent_id"),
            Some(&Value::from(docs[0].internal_id.clone()))
        );
        assert_eq!(frag.meta.get("_split_id"), Some(&Value::from(2u64)));
        assert_ne!(frag.fragment_id, docs[0].external_id);
    }

    #[test]
    fn numeric_id_is_deterministic() {
        assert_eq!(numeric_fragment_id("abc"), numeric_fragment_id("abc"));
        assert_ne!(numeric_fragment_id("abc"), numeric_fragment_id("abd"));
    }
}
