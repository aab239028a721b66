//! Latent class enumeration
//!
//! Class index c in [0, 2^K) encodes a full mastery pattern: bit k of c is
//! alpha_k (LSB = attribute 0). The same order is used by estimation,
//! classification and item selection.

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};
use crate::types::MAX_ATTRIBUTES;

/// Enumerate all 2^K mastery patterns in class-index order
pub fn enumerate_latent_classes(num_attributes: usize) -> Result<Vec<Vec<bool>>> {
    let classes = LatentClasses::new(num_attributes)?;
    Ok(classes.iter().map(|c| classes.decode(c)).collect())
}

/// The latent class space for K attributes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatentClasses {
    num_attributes: usize,
}

impl LatentClasses {
    pub fn new(num_attributes: usize) -> Result<Self> {
        if num_attributes == 0 || num_attributes > MAX_ATTRIBUTES {
            return Err(CdmError::invalid(format!(
                "K={num_attributes} outside supported range 1..={MAX_ATTRIBUTES}"
            )));
        }
        Ok(Self { num_attributes })
    }

    pub fn num_attributes(&self) -> usize {
        self.num_attributes
    }

    pub fn num_classes(&self) -> usize {
        1usize << self.num_attributes
    }

    pub fn iter(&self) -> std::ops::Range<usize> {
        0..self.num_classes()
    }

    /// Mastery pattern of class c
    pub fn decode(&self, class: usize) -> Vec<bool> {
        (0..self.num_attributes)
            .map(|k| has_attribute(class, k))
            .collect()
    }

    /// Class index of a mastery pattern
    pub fn encode(&self, alpha: &[bool]) -> Result<usize> {
        if alpha.len() != self.num_attributes {
            return Err(CdmError::invalid(format!(
                "pattern has {} attributes, expected {}",
                alpha.len(),
                self.num_attributes
            )));
        }
        Ok(encode_pattern(alpha))
    }

    /// Number of mastered attributes in class c
    pub fn mastered_count(&self, class: usize) -> usize {
        (class & (self.num_classes() - 1)).count_ones() as usize
    }

    /// Uniform distribution over all classes
    pub fn uniform(&self) -> Vec<f64> {
        let n = self.num_classes();
        vec![1.0 / n as f64; n]
    }
}

/// Whether class c has mastered attribute k
#[inline]
pub fn has_attribute(class: usize, k: usize) -> bool {
    (class >> k) & 1 == 1
}

/// Class index of a pattern (bit k = alpha_k)
pub fn encode_pattern(alpha: &[bool]) -> usize {
    alpha
        .iter()
        .enumerate()
        .fold(0, |acc, (k, &a)| if a { acc | (1 << k) } else { acc })
}

/// Index into the 2^r reduced space of an item requiring `required` attributes.
///
/// Bit r of the result is alpha of the r-th required attribute.
#[inline]
pub fn reduced_index(class: usize, required: &[usize]) -> usize {
    required
        .iter()
        .enumerate()
        .fold(0, |acc, (r, &k)| acc | (((class >> k) & 1) << r))
}
