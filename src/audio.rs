//! Speech synthesis collaborator.
//!
//! The pipeline never talks to a TTS model directly; it goes through the
//! [`SpeechSynthesizer`] trait so the synthesis backend stays swappable and
//! tests can plug in a stub. Synthesized artifacts land in the transient
//! audio directory, which is wiped on every pipeline rebuild.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Turns a piece of result text into an audio artifact on disk.
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and return the path of the written artifact.
    fn synthesize(&self, text: &str, out_dir: &Path) -> Result<PathBuf>;
}

/// Search-side stage that attaches synthesized audio to results.
pub struct SynthStage {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    out_dir: PathBuf,
}

impl SynthStage {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, out_dir: PathBuf) -> Self {
        Self {
            synthesizer,
            out_dir,
        }
    }

    pub fn synthesize(&self, text: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)?;
        self.synthesizer.synthesize(text, &self.out_dir)
    }
}
