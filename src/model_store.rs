use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::classifier::{CategoryModel, ClassifierError};

pub const MODEL_PATH_ENV: &str = "TXCAT_MODEL_PATH";
const MODEL_FILE_NAME: &str = "model.bin";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Model file not found: {0}")]
    NotFound(PathBuf),
    #[error("Model file is corrupt: {0}")]
    Corrupt(#[source] ClassifierError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Persists a trained [`CategoryModel`] at a fixed path so training only has to
/// happen on a cold start.
#[derive(Debug, Clone)]
pub struct ModelStore {
    path: PathBuf,
}

impl ModelStore {
    /// Creates a ModelStore at the default model path
    pub fn new_default() -> Self {
        Self::new(Self::default_model_path())
    }

    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the default model file path
    pub fn default_model_path() -> PathBuf {
        // 1. Check environment variable
        match env::var(MODEL_PATH_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => Self::platform_model_path(),
        }
    }

    /// Default model location when no explicit path is configured
    pub fn platform_model_path() -> PathBuf {
        // 2. Use platform-specific data directory
        if let Some(data_dir) = dirs::data_dir() {
            return data_dir.join("txcat").join(MODEL_FILE_NAME);
        }

        // 3. Fallback to user's home directory
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir
                .join(".local")
                .join("share")
                .join("txcat")
                .join(MODEL_FILE_NAME);
        }

        // 4. If all else fails, use system temp directory (platform agnostic)
        env::temp_dir().join("txcat").join(MODEL_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Loads and verifies the persisted model.
    ///
    /// # Errors
    /// * `NotFound` if no model file exists
    /// * `Corrupt` if the file does not decode to a valid model
    /// * `Io` for any other read failure
    pub fn load(&self) -> Result<CategoryModel, StoreError> {
        log::info!("Loading model from {:?}", self.path);
        let bytes = fs::read(&self.path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(self.path.clone()),
            _ => StoreError::Io(e),
        })?;
        log::debug!("Read {} bytes", bytes.len());

        let model = CategoryModel::deserialize(&bytes).map_err(StoreError::Corrupt)?;
        log::info!("Model loaded: {} categories", model.info().num_categories);
        Ok(model)
    }

    /// Writes the model to a uniquely named file next to its final location, syncs
    /// it, then renames it into place. A crash mid-write leaves at most a stray
    /// temporary file, never a truncated model at `path`, and concurrent writers
    /// never share a temporary file.
    pub fn save(&self, model: &CategoryModel) -> Result<(), StoreError> {
        let blob = model
            .serialize()
            .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        log::debug!("Creating parent directory: {:?}", dir);
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        log::debug!("Writing {} bytes to {:?}", blob.len(), tmp.path());
        tmp.write_all(&blob)?;
        tmp.as_file().sync_all()?;
        // Dropping the temporary file on any error above removes it.
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        log::info!("Model saved to {:?}", self.path);
        Ok(())
    }

    /// Deletes the persisted model, if any
    pub fn remove(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            log::info!("Removing model file {:?}", self.path);
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::TrainingExample;
    use tempfile::TempDir;

    fn trained() -> CategoryModel {
        CategoryModel::train(vec![
            TrainingExample::new("Groceries", "WALMART #123"),
            TrainingExample::new("Utilities", "CITY POWER CO"),
        ])
        .unwrap()
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("absent.bin"));
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(StoreError::NotFound(_))));
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_save_creates_parents_and_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let parent = dir.path().join("nested").join("deeper");
        let store = ModelStore::new(parent.join("model.bin"));
        store.save(&trained()).unwrap();
        assert!(store.exists());
        assert_eq!(dir_entries(&parent), vec!["model.bin".to_string()]);
        assert_eq!(store.load().unwrap(), trained());
    }

    #[test]
    fn test_concurrent_saves_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.bin");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = ModelStore::new(&path);
                std::thread::spawn(move || store.save(&trained()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(ModelStore::new(&path).load().unwrap(), trained());
        assert_eq!(dir_entries(dir.path()), vec!["model.bin".to_string()]);
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path().join("model.bin"));
        store.remove().unwrap();
        store.save(&trained()).unwrap();
        store.remove().unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn test_default_model_path() {
        env::set_var(MODEL_PATH_ENV, "/tmp/txcat-test/custom.bin");
        assert_eq!(
            ModelStore::default_model_path(),
            PathBuf::from("/tmp/txcat-test/custom.bin")
        );
        env::remove_var(MODEL_PATH_ENV);

        let path = ModelStore::default_model_path();
        assert!(path.ends_with("txcat/model.bin"));
        assert_eq!(path, ModelStore::platform_model_path());
    }
}
