//! Sound effect clips, decoded once at startup and shared by reference.

use crate::error::AudioError;
use crate::mixer::Sample;
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub struct EffectLibrary {
    clips: HashMap<String, Arc<Vec<Sample>>>,
}

impl EffectLibrary {
    /// Decode every audio file in the effects directory. A missing
    /// directory or an undecodable file is logged and skipped, not fatal.
    pub async fn load(dir: impl AsRef<Path>) -> Result<EffectLibrary> {
        let dir = dir.as_ref().to_path_buf();
        let clips = tokio::task::spawn_blocking(move || load_dir(&dir)).await?;
        info!("Loaded {} effect clips", clips.len());
        Ok(EffectLibrary { clips })
    }

    pub fn empty() -> EffectLibrary {
        EffectLibrary {
            clips: HashMap::new(),
        }
    }

    /// Register a clip directly, bypassing the filesystem.
    pub fn insert(&mut self, name: &str, samples: Vec<Sample>) {
        self.clips.insert(name.to_lowercase(), Arc::new(samples));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Vec<Sample>>, AudioError> {
        self.clips
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| AudioError::UnknownEffect(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clips.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

fn load_dir(dir: &Path) -> HashMap<String, Arc<Vec<Sample>>> {
    let mut clips = HashMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Effects directory {} unavailable: {e}", dir.display());
            return clips;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let name = name.to_lowercase();

        match crate::decode::decode_file(&path) {
            Ok(samples) => {
                info!("Loaded effect clip '{name}' from {}", path.display());
                clips.insert(name, Arc::new(samples));
            }
            Err(e) => {
                warn!("Skipping effect file {}: {e}", path.display());
            }
        }
    }

    clips
}
