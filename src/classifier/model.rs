use std::collections::{BTreeMap, BTreeSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::builder::{CategoryModelBuilder, TrainingDataset};
use super::error::ClassifierError;
use super::features::FeatureBag;

/// Laplace smoothing applied when none is configured.
pub const DEFAULT_SMOOTHING: f64 = 1.0;

/// Version of the persisted blob layout and of the tokenizer policy it was trained with.
pub const FORMAT_VERSION: u16 = 1;

const MAGIC: &[u8; 4] = b"TXCM";
const CHECKSUM_LEN: usize = 32;
const HEADER_LEN: usize = MAGIC.len() + 2 + CHECKSUM_LEN;

/// Token statistics accumulated for a single category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct CategoryStats {
    /// Number of training examples labelled with this category
    pub examples: u64,
    /// Sum of all token occurrences seen for this category
    pub total_tokens: u64,
    /// Token occurrences, keyed by encountered tokens only
    pub tokens: BTreeMap<String, u64>,
}

impl CategoryStats {
    pub(crate) fn observe(&mut self, bag: &FeatureBag) {
        self.examples += 1;
        for (token, count) in bag.iter() {
            *self.tokens.entry(token.to_owned()).or_insert(0) += count as u64;
            self.total_tokens += count as u64;
        }
    }
}

/// The part of a model that goes to disk. Everything else is derived from it.
#[derive(Debug, Serialize, Deserialize)]
struct ModelState {
    smoothing: f64,
    categories: BTreeMap<String, CategoryStats>,
}

/// Summary of a trained model, mostly useful for logging
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub num_categories: usize,
    pub category_labels: Vec<String>,
    pub vocabulary_size: usize,
    pub training_examples: u64,
    pub smoothing: f64,
}

/// Multinomial naive Bayes model over transaction description tokens.
///
/// A category `c` scores a bag as
///
/// ```text
/// ln(examples_c / examples) + Σ count(t) · ln((n(t, c) + α) / (N_c + α·|V|))
/// ```
///
/// where `n(t, c)` is how often token `t` was seen under `c`, `N_c` the total token
/// count of `c` and `|V|` the vocabulary size. Tokens never seen in training are
/// ignored, and smoothing keeps a token unseen under one category from eliminating it.
///
/// The model is immutable once built, so it can be shared behind an `Arc` and
/// queried from any number of threads without locking.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryModel {
    smoothing: f64,
    categories: BTreeMap<String, CategoryStats>,
    vocabulary: BTreeSet<String>,
    total_examples: u64,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<CategoryModel>();
    }
};

impl CategoryModel {
    /// Creates a new CategoryModelBuilder for fluent construction
    pub fn builder() -> CategoryModelBuilder {
        CategoryModelBuilder::new()
    }

    /// Trains a model with default smoothing on every example of `dataset`.
    ///
    /// # Errors
    /// * `EmptyDataset` if the dataset holds no examples
    /// * `ValidationError` if an example has an empty category label
    pub fn train(dataset: TrainingDataset) -> Result<Self, ClassifierError> {
        Self::builder().add_examples(dataset)?.build()
    }

    pub(crate) fn from_parts(
        smoothing: f64,
        categories: BTreeMap<String, CategoryStats>,
    ) -> Self {
        let vocabulary = categories
            .values()
            .flat_map(|stats| stats.tokens.keys().cloned())
            .collect();
        let total_examples = categories
            .values()
            .fold(0u64, |acc, stats| acc.saturating_add(stats.examples));
        Self {
            smoothing,
            categories,
            vocabulary,
            total_examples,
        }
    }

    /// Returns information about the model's learned state
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            num_categories: self.categories.len(),
            category_labels: self.categories.keys().cloned().collect(),
            vocabulary_size: self.vocabulary.len(),
            training_examples: self.total_examples,
            smoothing: self.smoothing,
        }
    }

    /// Known category labels in ascending order
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Predicts the category of a feature bag.
    ///
    /// An empty bag, or one made only of unknown tokens, falls back to the category
    /// with the most training examples. Equal scores resolve to the lexicographically
    /// smallest label.
    ///
    /// # Errors
    /// * `UntrainedModel` if the model knows no categories
    pub fn predict(&self, bag: &FeatureBag) -> Result<String, ClassifierError> {
        self.predict_with_scores(bag).map(|(label, _)| label)
    }

    /// Predicts the category of a feature bag and returns the raw log score of every
    /// category alongside it. Scores are unnormalized log likelihoods, higher is better.
    pub fn predict_with_scores(
        &self,
        bag: &FeatureBag,
    ) -> Result<(String, BTreeMap<String, f64>), ClassifierError> {
        if self.categories.is_empty() || self.total_examples == 0 {
            return Err(ClassifierError::UntrainedModel);
        }

        let vocabulary_size = self.vocabulary.len() as f64;
        let total_examples = self.total_examples as f64;

        let mut scores = BTreeMap::new();
        let mut best: Option<(&str, f64)> = None;
        for (label, stats) in &self.categories {
            let denominator = stats.total_tokens as f64 + self.smoothing * vocabulary_size;
            let mut score = (stats.examples as f64 / total_examples).ln();
            for (token, count) in bag.iter() {
                if !self.vocabulary.contains(token) {
                    continue;
                }
                let seen = stats.tokens.get(token).copied().unwrap_or(0) as f64;
                score += count as f64 * ((seen + self.smoothing) / denominator).ln();
            }

            // Strict comparison over ascending labels keeps the smallest label on ties
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((label.as_str(), score));
            }
            scores.insert(label.clone(), score);
        }

        let label = best
            .map(|(label, _)| label.to_owned())
            .ok_or(ClassifierError::UntrainedModel)?;
        Ok((label, scores))
    }

    /// Serializes the model into a self-describing blob:
    /// magic, format version, SHA-256 of the payload, JSON payload.
    pub fn serialize(&self) -> Result<Vec<u8>, ClassifierError> {
        let state = ModelState {
            smoothing: self.smoothing,
            categories: self.categories.clone(),
        };
        let payload = serde_json::to_vec(&state)
            .map_err(|e| ClassifierError::ValidationError(format!("Failed to encode model: {}", e)))?;

        let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.extend_from_slice(&Sha256::digest(&payload));
        blob.extend_from_slice(&payload);
        Ok(blob)
    }

    /// Rebuilds a model from a blob produced by [`CategoryModel::serialize`].
    ///
    /// # Errors
    /// * `CorruptModel` if the blob is truncated, carries a foreign magic or format
    ///   version, fails its checksum, or decodes to inconsistent statistics
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ClassifierError> {
        if bytes.len() < HEADER_LEN {
            return Err(ClassifierError::CorruptModel(format!(
                "blob is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }

        let (magic, rest) = bytes.split_at(MAGIC.len());
        if magic != MAGIC {
            return Err(ClassifierError::CorruptModel("unrecognized magic".into()));
        }

        let (version, rest) = rest.split_at(2);
        let version = u16::from_le_bytes([version[0], version[1]]);
        if version != FORMAT_VERSION {
            return Err(ClassifierError::CorruptModel(format!(
                "unsupported format version {}, expected {}",
                version, FORMAT_VERSION
            )));
        }

        let (checksum, payload) = rest.split_at(CHECKSUM_LEN);
        if Sha256::digest(payload).as_slice() != checksum {
            return Err(ClassifierError::CorruptModel("checksum mismatch".into()));
        }

        let state: ModelState = serde_json::from_slice(payload)
            .map_err(|e| ClassifierError::CorruptModel(format!("malformed payload: {}", e)))?;
        Self::validate_state(&state)?;

        Ok(Self::from_parts(state.smoothing, state.categories))
    }

    fn validate_state(state: &ModelState) -> Result<(), ClassifierError> {
        if !state.smoothing.is_finite() || state.smoothing <= 0.0 {
            return Err(ClassifierError::CorruptModel(format!(
                "invalid smoothing {}",
                state.smoothing
            )));
        }
        if state.categories.is_empty() {
            return Err(ClassifierError::CorruptModel("no categories".into()));
        }
        let mut total_examples = 0u64;
        for (label, stats) in &state.categories {
            if label.trim().is_empty() {
                return Err(ClassifierError::CorruptModel("empty category label".into()));
            }
            if stats.examples == 0 {
                return Err(ClassifierError::CorruptModel(format!(
                    "category '{}' has no examples",
                    label
                )));
            }
            total_examples = total_examples
                .checked_add(stats.examples)
                .ok_or_else(|| ClassifierError::CorruptModel("count overflow".into()))?;
            let total = stats
                .tokens
                .values()
                .try_fold(0u64, |acc, &count| acc.checked_add(count))
                .ok_or_else(|| ClassifierError::CorruptModel("count overflow".into()))?;
            if total != stats.total_tokens {
                return Err(ClassifierError::CorruptModel(format!(
                    "category '{}' token total {} does not match recorded {}",
                    label, total, stats.total_tokens
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::features::extract;
    use crate::classifier::TrainingExample;

    fn grocery_dataset() -> TrainingDataset {
        vec![
            TrainingExample::new("Groceries", "WALMART #123"),
            TrainingExample::new("Groceries", "TRADER JOES"),
            TrainingExample::new("Utilities", "CITY POWER CO"),
        ]
    }

    #[test]
    fn test_predicts_from_shared_tokens() {
        let model = CategoryModel::train(grocery_dataset()).unwrap();
        assert_eq!(model.predict(&extract("WALMART SUPERCENTER")).unwrap(), "Groceries");
        assert_eq!(model.predict(&extract("city power bill")).unwrap(), "Utilities");
    }

    #[test]
    fn test_empty_bag_falls_back_to_prior() {
        let model = CategoryModel::train(grocery_dataset()).unwrap();
        assert_eq!(model.predict(&FeatureBag::new()).unwrap(), "Groceries");
        assert_eq!(model.predict(&extract("zzz unknown")).unwrap(), "Groceries");
    }

    #[test]
    fn test_ties_resolve_to_smallest_label() {
        let model = CategoryModel::train(vec![
            TrainingExample::new("Zoo", "ticket"),
            TrainingExample::new("Art", "ticket"),
        ])
        .unwrap();
        let (label, scores) = model.predict_with_scores(&extract("ticket")).unwrap();
        assert_eq!(label, "Art");
        assert_eq!(scores["Art"], scores["Zoo"]);
    }

    #[test]
    fn test_unseen_token_does_not_eliminate_category() {
        let model = CategoryModel::train(vec![
            TrainingExample::new("Travel", "uber trip"),
            TrainingExample::new("Travel", "uber ride"),
            TrainingExample::new("Dining", "pizza"),
        ])
        .unwrap();
        let (label, scores) = model.predict_with_scores(&extract("uber pizza")).unwrap();
        assert!(scores.values().all(|s| s.is_finite()));
        assert_eq!(label, "Travel");
    }

    #[test]
    fn test_untrained_model() {
        let model = CategoryModel::from_parts(DEFAULT_SMOOTHING, BTreeMap::new());
        assert!(matches!(
            model.predict(&extract("anything")),
            Err(ClassifierError::UntrainedModel)
        ));
    }

    #[test]
    fn test_info() {
        let model = CategoryModel::train(grocery_dataset()).unwrap();
        let info = model.info();
        assert_eq!(info.num_categories, 2);
        assert_eq!(info.category_labels, vec!["Groceries", "Utilities"]);
        // walmart, trader, joes, city, power, co
        assert_eq!(info.vocabulary_size, 6);
        assert_eq!(info.training_examples, 3);
        assert_eq!(info.smoothing, DEFAULT_SMOOTHING);
    }

    #[test]
    fn test_blob_header() {
        let blob = CategoryModel::train(grocery_dataset()).unwrap().serialize().unwrap();
        assert_eq!(&blob[..4], MAGIC);
        assert_eq!(u16::from_le_bytes([blob[4], blob[5]]), FORMAT_VERSION);
        assert!(blob.len() > HEADER_LEN);
    }

    #[test]
    fn test_round_trip_preserves_state() {
        let model = CategoryModel::builder()
            .with_smoothing(0.37)
            .unwrap()
            .add_examples(grocery_dataset())
            .unwrap()
            .build()
            .unwrap();
        let restored = CategoryModel::deserialize(&model.serialize().unwrap()).unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn test_version_mismatch() {
        let mut blob = CategoryModel::train(grocery_dataset()).unwrap().serialize().unwrap();
        blob[4..6].copy_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
        let err = CategoryModel::deserialize(&blob).unwrap_err();
        assert!(matches!(err, ClassifierError::CorruptModel(msg) if msg.contains("version")));
    }

    #[test]
    fn test_every_flipped_byte_is_rejected() {
        let blob = CategoryModel::train(grocery_dataset()).unwrap().serialize().unwrap();
        for i in 0..blob.len() {
            let mut corrupted = blob.clone();
            corrupted[i] ^= 0x01;
            assert!(
                matches!(
                    CategoryModel::deserialize(&corrupted),
                    Err(ClassifierError::CorruptModel(_))
                ),
                "flip at byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn test_truncated_and_garbage_blobs() {
        assert!(matches!(
            CategoryModel::deserialize(b""),
            Err(ClassifierError::CorruptModel(_))
        ));
        assert!(matches!(
            CategoryModel::deserialize(b"TXCM"),
            Err(ClassifierError::CorruptModel(_))
        ));
        assert!(matches!(
            CategoryModel::deserialize(&[0u8; 128]),
            Err(ClassifierError::CorruptModel(_))
        ));
    }

    #[test]
    fn test_inconsistent_payload_with_valid_checksum() {
        let payload = br#"{"smoothing":1.0,"categories":{"Rent":{"examples":1,"total_tokens":5,"tokens":{"landlord":1}}}}"#;
        let mut blob = Vec::new();
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.extend_from_slice(&Sha256::digest(payload));
        blob.extend_from_slice(payload);
        assert!(matches!(
            CategoryModel::deserialize(&blob),
            Err(ClassifierError::CorruptModel(msg)) if msg.contains("token total")
        ));
    }

    fn sealed(payload: &[u8]) -> Vec<u8> {
        let mut blob = Vec::new();
        blob.extend_from_slice(MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.extend_from_slice(&Sha256::digest(payload));
        blob.extend_from_slice(payload);
        blob
    }

    #[test]
    fn test_overflowing_token_counts_are_corrupt() {
        let payload = br#"{"smoothing":1.0,"categories":{"Rent":{"examples":1,"total_tokens":0,"tokens":{"a":18446744073709551615,"b":1}}}}"#;
        assert!(matches!(
            CategoryModel::deserialize(&sealed(payload)),
            Err(ClassifierError::CorruptModel(msg)) if msg == "count overflow"
        ));
    }

    #[test]
    fn test_overflowing_example_counts_are_corrupt() {
        let payload = br#"{"smoothing":1.0,"categories":{"Fun":{"examples":18446744073709551615,"total_tokens":0,"tokens":{}},"Rent":{"examples":1,"total_tokens":0,"tokens":{}}}}"#;
        assert!(matches!(
            CategoryModel::deserialize(&sealed(payload)),
            Err(ClassifierError::CorruptModel(msg)) if msg == "count overflow"
        ));
    }
}
