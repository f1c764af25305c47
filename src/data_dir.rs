use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Filesystem layout for one docpipe session.
///
/// Owned by the caller and passed down explicitly, so two sessions with
/// different roots never share store or audio state.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCPIPE_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docpipe/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCPIPE_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docpipe")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the on-disk search index for one index name.
    pub fn index_dir(&self, index_name: &str) -> Result<PathBuf> {
        let path = self.root.join("indexes").join(index_name);
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Embedding database file for one index name.
    pub fn embeddings_db(&self, index_name: &str) -> Result<PathBuf> {
        let dir = self.root.join("embeddings");
        std::fs::create_dir_all(&dir)
            .map_err(|_| Error::DataDir(dir.clone()))?;
        Ok(dir.join(format!("{index_name}.redb")))
    }

    /// Directory for synthesized audio artifacts. Transient working state.
    pub fn audio_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("audio");
        std::fs::create_dir_all(&path)
            .map_err(|_| Error::DataDir(path.clone()))?;
        Ok(path)
    }

    /// Delete and recreate the transient artifact directories.
    ///
    /// Runs on every pipeline rebuild; indexed data is left alone.
    pub fn reset_transient(&self) -> Result<()> {
        let audio = self.root.join("audio");
        if audio.exists() {
            std::fs::remove_dir_all(&audio)?;
        }
        std::fs::create_dir_all(&audio)
            .map_err(|_| Error::DataDir(audio.clone()))?;
        Ok(())
    }
}
