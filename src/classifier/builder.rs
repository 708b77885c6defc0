use std::collections::BTreeMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::features::extract;
use super::model::{CategoryModel, CategoryStats, DEFAULT_SMOOTHING};

/// A categorized transaction description used for training
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    /// The budgeting category the user assigned
    pub category: String,
    /// Free-text merchant or memo string of the transaction
    pub description: String,
}

impl TrainingExample {
    /// Creates a new training example
    ///
    /// # Example
    /// ```
    /// use txcat::TrainingExample;
    ///
    /// let example = TrainingExample::new("Groceries", "TRADER JOES #552");
    /// assert_eq!(example.category, "Groceries");
    /// ```
    pub fn new(category: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
        }
    }
}

/// Training input as delivered by the finance application. Order does not matter.
pub type TrainingDataset = Vec<TrainingExample>;

/// A builder for constructing a CategoryModel with a fluent interface.
///
/// Examples are folded into per-category statistics as they are added, so the
/// builder never holds on to the raw dataset.
#[derive(Debug)]
pub struct CategoryModelBuilder {
    smoothing: f64,
    categories: BTreeMap<String, CategoryStats>,
    examples: u64,
}

impl Default for CategoryModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryModelBuilder {
    /// Creates a new empty builder with Laplace smoothing
    ///
    /// # Example
    /// ```
    /// use txcat::CategoryModelBuilder;
    ///
    /// let builder = CategoryModelBuilder::new();
    /// ```
    pub fn new() -> Self {
        Self {
            smoothing: DEFAULT_SMOOTHING,
            categories: BTreeMap::new(),
            examples: 0,
        }
    }

    /// Sets the additive smoothing constant used when scoring tokens
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder, or a `ValidationError` if
    ///   `alpha` is not a finite positive number
    pub fn with_smoothing(mut self, alpha: f64) -> Result<Self, ClassifierError> {
        if !alpha.is_finite() || alpha <= 0.0 {
            return Err(ClassifierError::ValidationError(format!(
                "Smoothing must be a finite positive number, got {}",
                alpha
            )));
        }
        self.smoothing = alpha;
        Ok(self)
    }

    /// Adds one categorized example
    ///
    /// A description that normalizes to no tokens still counts toward the prior of
    /// its category.
    ///
    /// # Returns
    /// * `Result<Self, ClassifierError>` - The builder, or a `ValidationError` if the
    ///   category label is empty
    ///
    /// # Example
    /// ```
    /// use txcat::{CategoryModel, TrainingExample};
    ///
    /// let builder = CategoryModel::builder()
    ///     .add_example(TrainingExample::new("Utilities", "CITY POWER CO"));
    /// assert!(builder.is_ok());
    /// ```
    pub fn add_example(mut self, example: TrainingExample) -> Result<Self, ClassifierError> {
        if example.category.trim().is_empty() {
            return Err(ClassifierError::ValidationError(format!(
                "Example '{}' has an empty category label",
                example.description
            )));
        }

        let bag = extract(&example.description);
        if bag.is_empty() {
            debug!("Example '{}' yields no tokens", example.description);
        }
        self.categories
            .entry(example.category)
            .or_default()
            .observe(&bag);
        self.examples += 1;
        Ok(self)
    }

    /// Adds every example of an iterator, stopping at the first invalid one
    pub fn add_examples<I>(self, examples: I) -> Result<Self, ClassifierError>
    where
        I: IntoIterator<Item = TrainingExample>,
    {
        examples
            .into_iter()
            .try_fold(self, |builder, example| builder.add_example(example))
    }

    /// Builds and returns the final CategoryModel instance
    ///
    /// # Returns
    /// * `Result<CategoryModel, ClassifierError>` - The trained model, or
    ///   `EmptyDataset` if no example was added
    pub fn build(self) -> Result<CategoryModel, ClassifierError> {
        if self.examples == 0 {
            return Err(ClassifierError::EmptyDataset);
        }

        let model = CategoryModel::from_parts(self.smoothing, self.categories);
        let info = model.info();
        info!(
            "Trained on {} examples: {} categories, {} distinct tokens",
            info.training_examples, info.num_categories, info.vocabulary_size
        );
        Ok(model)
    }
}
