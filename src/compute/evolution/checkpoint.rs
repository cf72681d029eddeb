//! On-disk checkpoints of optimizer state, one JSON file per generation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::schema::OptimizerState;

const PREFIX: &str = "checkpoint_gen";

/// Directory of generation checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open (and create if needed) a checkpoint directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a checkpoint for the state's generation.
    pub fn save(&self, state: &OptimizerState) -> io::Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{PREFIX}{:04}.json", state.current_generation));

        let json = serde_json::to_string_pretty(state)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Load a checkpoint file.
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<OptimizerState> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Checkpoint files with their generation, oldest first.
    pub fn list(&self) -> io::Result<Vec<(usize, PathBuf)>> {
        let mut checkpoints = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let generation = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(PREFIX))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<usize>().ok());

            if let Some(generation) = generation {
                checkpoints.push((generation, path));
            }
        }

        checkpoints.sort_by_key(|(generation, _)| *generation);
        Ok(checkpoints)
    }

    /// Load the most recent checkpoint, if any.
    pub fn load_latest(&self) -> io::Result<Option<OptimizerState>> {
        match self.list()?.pop() {
            Some((_, path)) => Self::load(path).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Individual, ParamValue, ParamVector};
    use tempfile::tempdir;

    fn state(generation: usize) -> OptimizerState {
        let params: ParamVector = [("depth".to_string(), ParamValue::Number(0.3))].into();
        OptimizerState {
            current_generation: generation,
            population: vec![Individual::new(params, generation)],
            ..Default::default()
        }
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoints")).unwrap();
        assert!(store.load_latest().unwrap().is_none());

        store.save(&state(2)).unwrap();
        store.save(&state(10)).unwrap();
        let path = store.save(&state(7)).unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        assert_eq!(CheckpointStore::load(&path).unwrap(), state(7));
        let generations: Vec<usize> = store.list().unwrap().into_iter().map(|(g, _)| g).collect();
        assert_eq!(generations, vec![2, 7, 10]);
        assert_eq!(store.load_latest().unwrap(), Some(state(10)));
    }

    #[test]
    fn test_corrupt_checkpoint() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("checkpoint_gen0001.json"), "{ broken").unwrap();

        let err = store.load_latest().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
