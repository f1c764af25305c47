use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::error::Result;

const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 4 bytes token count + 4 bytes dimension.
const HEADER_SIZE: usize = 8;

/// Stores per-token fragment embedding matrices keyed by numeric fragment id.
///
/// One database file exists per index name, so clearing an index never
/// touches another index's embeddings.
///
/// Binary format per entry:
/// - 4 bytes: token count T (u32 LE)
/// - 4 bytes: embedding dimension D (u32 LE)
/// - T * D * 4 bytes: f32 LE values in row-major order
pub struct EmbeddingDb {
    db: Database,
}

impl EmbeddingDb {
    /// Open or create an embeddings database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Store an embedding matrix for a single fragment.
    pub fn store(
        &self,
        fragment_id: u64,
        num_tokens: u32,
        dimension: u32,
        data: &[f32],
    ) -> Result<()> {
        self.batch_store(&[(fragment_id, num_tokens, dimension, data.to_vec())])
    }

    /// Store multiple embedding matrices in a single transaction.
    pub fn batch_store(
        &self,
        entries: &[(u64, u32, u32, Vec<f32>)],
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(EMBEDDINGS)?;
            for (fragment_id, num_tokens, dimension, data) in entries {
                assert_eq!(
                    data.len(),
                    (*num_tokens as usize) * (*dimension as usize),
                    "data length must equal num_tokens * dimension"
                );

                let byte_len =
                    HEADER_SIZE + std::mem::size_of_val(data.as_slice());
                let mut guard = table.insert_reserve(*fragment_id, byte_len)?;
                let dest = guard.as_mut();

                dest[0..4].copy_from_slice(&num_tokens.to_le_bytes());
                dest[4..8].copy_from_slice(&dimension.to_le_bytes());
                dest[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(data));
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Retrieve an embedding matrix for a fragment.
    ///
    /// Returns None when the fragment has no stored embedding or the stored
    /// bytes are malformed.
    pub fn load(&self, fragment_id: u64) -> Result<Option<EmbeddingMatrix>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;

        let Some(guard) = table.get(fragment_id)? else {
            return Ok(None);
        };

        let bytes = guard.value();
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }

        let num_tokens = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let dimension = u32::from_le_bytes(bytes[4..8].try_into().unwrap());

        let expected_len =
            HEADER_SIZE + (num_tokens as usize) * (dimension as usize) * 4;
        if bytes.len() != expected_len {
            return Ok(None);
        }

        let data: Vec<f32> =
            bytemuck::cast_slice(&bytes[HEADER_SIZE..]).to_vec();

        Ok(Some(EmbeddingMatrix {
            num_tokens,
            dimension,
            data,
        }))
    }

    /// List all stored fragment ids.
    pub fn list_ids(&self) -> Result<Vec<u64>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.push(k.value());
        }
        Ok(result)
    }

    /// Remove every stored embedding. Hard reset, used when an index is
    /// cleared.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(EMBEDDINGS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for EmbeddingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDb").finish_non_exhaustive()
    }
}

/// A retrieved per-token embedding matrix.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    pub num_tokens: u32,
    pub dimension: u32,
    /// Flat f32 values in row-major order: `data[token_idx * dimension + dim_idx]`.
    pub data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Get the embedding vector for a specific token.
    pub fn token_embedding(&self, token_idx: u32) -> &[f32] {
        let start = (token_idx * self.dimension) as usize;
        let end = start + self.dimension as usize;
        &self.data[start..end]
    }

    /// Mean-pool token embeddings into a single fragment vector.
    ///
    /// Used as the cheap first-stage representation for dense retrieval.
    pub fn mean_pooled(&self) -> Vec<f32> {
        let dim = self.dimension as usize;
        let tokens = self.num_tokens as usize;
        let mut pooled = vec![0.0f32; dim];
        if tokens == 0 {
            return pooled;
        }
        for t in 0..tokens {
            let row = &self.data[t * dim..(t + 1) * dim];
            for (acc, v) in pooled.iter_mut().zip(row) {
                *acc += v;
            }
        }
        for v in &mut pooled {
            *v /= tokens as f32;
        }
        pooled
    }
}
