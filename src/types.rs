//! Common Types and Constants
//!
//! Shared data structures used across the estimation, classification and
//! adaptive-testing modules.

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};

// ==================== Constants ====================

/// Largest supported number of attributes (2^20 latent classes)
pub const MAX_ATTRIBUTES: usize = 20;

/// Probabilities entering a logarithm are clamped to [PROB_FLOOR, 1 - PROB_FLOOR]
pub const PROB_FLOOR: f64 = 1e-10;

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Smallest prior mass used inside `ln`
pub const LOG_PRIOR_FLOOR: f64 = 1e-300;

/// Recommended minimum number of answered items before a classification is shown
pub const RECOMMENDED_MIN_RESPONSES: usize = 20;

/// Default DINA slip used for initialization and fallback
pub const DEFAULT_SLIP: f64 = 0.2;

/// Default DINA guess used for initialization and fallback
pub const DEFAULT_GUESS: f64 = 0.2;

/// Default G-DINA success probability per reduced pattern
pub const DEFAULT_GDINA_PROB: f64 = 0.5;

// ==================== Model Type ====================

/// Which CDM the estimator fits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    #[default]
    Dina,
    Gdina,
}

impl ModelType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "").as_str() {
            "dina" => Some(ModelType::Dina),
            "gdina" => Some(ModelType::Gdina),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Dina => "dina",
            ModelType::Gdina => "gdina",
        }
    }
}

// ==================== Attributes ====================

/// One binary cognitive skill
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Stable identifier (used by relational Q-matrix rows)
    pub id: String,
    /// Human-readable label
    pub label: String,
}

/// Ordered attribute set; position k is attribute k (bit k of a latent class)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    attributes: Vec<Attribute>,
}

impl AttributeSet {
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        if attributes.is_empty() || attributes.len() > MAX_ATTRIBUTES {
            return Err(CdmError::invalid(format!(
                "attribute count {} outside supported range 1..={MAX_ATTRIBUTES}",
                attributes.len()
            )));
        }
        for (i, a) in attributes.iter().enumerate() {
            if a.id.is_empty() {
                return Err(CdmError::invalid(format!("attribute {i} has an empty id")));
            }
            if attributes[..i].iter().any(|b| b.id == a.id) {
                return Err(CdmError::invalid(format!("duplicate attribute id '{}'", a.id)));
            }
        }
        Ok(Self { attributes })
    }

    /// Build from ids only; labels default to the ids
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Result<Self> {
        Self::new(
            ids.iter()
                .map(|id| Attribute {
                    id: id.as_ref().to_string(),
                    label: id.as_ref().to_string(),
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn get(&self, k: usize) -> Option<&Attribute> {
        self.attributes.get(k)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter()
    }

    /// Labels for a list of attribute indices; unknown indices are skipped
    pub fn labels(&self, indices: &[usize]) -> Vec<&str> {
        indices
            .iter()
            .filter_map(|&k| self.attributes.get(k).map(|a| a.label.as_str()))
            .collect()
    }
}

// ==================== Response Matrix ====================

/// N respondents x J items; `None` marks an item that was not administered.
///
/// Columns are aligned with the Q-matrix item order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMatrix {
    num_items: usize,
    rows: Vec<Vec<Option<bool>>>,
}

impl ResponseMatrix {
    pub fn new(num_items: usize, rows: Vec<Vec<Option<bool>>>) -> Result<Self> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != num_items {
                return Err(CdmError::invalid(format!(
                    "respondent {i} has {} responses, expected {num_items}",
                    row.len()
                )));
            }
        }
        Ok(Self { num_items, rows })
    }

    /// Fully observed matrix
    pub fn from_complete(num_items: usize, rows: Vec<Vec<bool>>) -> Result<Self> {
        Self::new(
            num_items,
            rows.into_iter()
                .map(|r| r.into_iter().map(Some).collect())
                .collect(),
        )
    }

    pub fn num_respondents(&self) -> usize {
        self.rows.len()
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Option<bool>>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> &[Option<bool>] {
        &self.rows[i]
    }

    pub fn get(&self, i: usize, j: usize) -> Option<bool> {
        self.rows.get(i).and_then(|r| r.get(j).copied().flatten())
    }

    /// Number of respondents who answered item j
    pub fn observed_count(&self, j: usize) -> usize {
        self.rows.iter().filter(|r| r[j].is_some()).count()
    }

    /// Observed (item, correct) pairs of one respondent, in item order
    pub fn observations(&self, i: usize) -> impl Iterator<Item = (usize, bool)> + '_ {
        observed(&self.rows[i])
    }
}

/// Observed (item, correct) pairs of a response row, in item order
pub(crate) fn observed(row: &[Option<bool>]) -> impl Iterator<Item = (usize, bool)> + '_ {
    row.iter()
        .enumerate()
        .filter_map(|(j, x)| x.map(|x| (j, x)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_type_parse() {
        assert_eq!(ModelType::from_str("DINA"), Some(ModelType::Dina));
        assert_eq!(ModelType::from_str("g-dina"), Some(ModelType::Gdina));
        assert_eq!(ModelType::from_str("irt"), None);
        assert_eq!(ModelType::Gdina.as_str(), "gdina");
    }

    #[test]
    fn test_attribute_set_rejects_duplicates() {
        assert!(AttributeSet::from_ids(&["a", "a"]).is_err());
        assert!(AttributeSet::from_ids::<&str>(&[]).is_err());
        let set = AttributeSet::from_ids(&["a", "b", "c"]).unwrap();
        assert_eq!(set.index_of("c"), Some(2));
        assert_eq!(set.labels(&[0, 2, 9]), vec!["a", "c"]);
    }

    #[test]
    fn test_response_matrix_shape() {
        let bad = ResponseMatrix::new(2, vec![vec![Some(true)]]);
        assert!(bad.is_err());

        let m = ResponseMatrix::new(3, vec![vec![Some(true), None, Some(false)]]).unwrap();
        assert_eq!(m.observed_count(1), 0);
        assert_eq!(m.get(0, 0), Some(true));
        assert_eq!(m.get(0, 1), None);
        let obs: Vec<_> = m.observations(0).collect();
        assert_eq!(obs, vec![(0, true), (2, false)]);
    }
}
