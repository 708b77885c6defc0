use std::collections::BTreeMap;

/// Tokens that carry no merchant or memo signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "of", "for", "to", "in", "at", "on", "a", "an", "from", "by", "with",
];

const MIN_TOKEN_CHARS: usize = 2;

/// Normalized token multiset derived from a transaction description.
///
/// Tokens are kept in a `BTreeMap` so that iteration order, and therefore every
/// floating point sum computed over a bag, is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureBag {
    counts: BTreeMap<String, u32>,
}

impl FeatureBag {
    /// Creates an empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more occurrence of `token`
    pub fn insert(&mut self, token: impl Into<String>) {
        *self.counts.entry(token.into()).or_insert(0) += 1;
    }

    /// Occurrences of `token`, zero when absent
    pub fn count(&self, token: &str) -> u32 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    /// Number of distinct tokens
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Total number of token occurrences
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| c as u64).sum()
    }

    /// Iterates `(token, count)` pairs in ascending token order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(t, &c)| (t.as_str(), c))
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureBag {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut bag = FeatureBag::new();
        for token in iter {
            bag.insert(token);
        }
        bag
    }
}

/// Splits a description into normalized tokens, in order of appearance.
///
/// Normalization:
/// 1. Unicode lowercase
/// 2. Split on anything that is not alphanumeric
/// 3. Drop tokens shorter than two characters
/// 4. Drop tokens made only of ASCII digits (store numbers, dates, amounts)
/// 5. Drop stop words
///
/// Training and prediction both go through this function. Changing the policy
/// invalidates every persisted model, so bump `FORMAT_VERSION` in `model.rs` with it.
pub fn tokenize(description: &str) -> Vec<String> {
    description
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !token.bytes().all(|b| b.is_ascii_digit()))
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_owned)
        .collect()
}

/// Extracts the feature bag of a description. Empty input yields an empty bag.
pub fn extract(description: &str) -> FeatureBag {
    tokenize(description).into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert!(extract("").is_empty());
        assert!(extract("   \t\n").is_empty());
        assert!(extract("#123 / 45").is_empty());
    }

    #[test]
    fn test_normalization() {
        assert_eq!(tokenize("WALMART #123"), vec!["walmart"]);
        assert_eq!(
            tokenize("Payment to CITY-POWER Co. for 03/2024"),
            vec!["payment", "city", "power", "co"]
        );
    }

    #[test]
    fn test_mixed_alphanumeric_tokens_are_kept() {
        assert_eq!(tokenize("7ELEVEN store 42"), vec!["7eleven", "store"]);
    }

    #[test]
    fn test_unicode_lowercase() {
        let bag = extract("CAFÉ Müller café");
        assert_eq!(bag.count("café"), 2);
        assert_eq!(bag.count("müller"), 1);
    }

    #[test]
    fn test_counts_repeated_tokens() {
        let bag = extract("Uber uber UBER trip");
        assert_eq!(bag.count("uber"), 3);
        assert_eq!(bag.count("trip"), 1);
        assert_eq!(bag.len(), 2);
        assert_eq!(bag.total(), 4);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let text = "AMZN Mktp US*2K4 Amazon.com Bill WA";
        assert_eq!(extract(text), extract(text));
        let tokens: Vec<_> = extract(text).iter().map(|(t, _)| t.to_string()).collect();
        let mut sorted = tokens.clone();
        sorted.sort();
        assert_eq!(tokens, sorted);
    }
}
