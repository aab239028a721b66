//! G-DINA (Generalized DINA) item model
//!
//! Each item carries one success probability per reduced attribute pattern
//! (2^{r_j} entries, r_j = number of required attributes). Bit r of a reduced
//! pattern is the mastery of the r-th required attribute.
//!
//! Success probabilities are unconstrained: no ordering between patterns is
//! enforced.

use serde::{Deserialize, Serialize};

use crate::latent::reduced_index;
use crate::matrix::{design_matrix, mat_vec_mul, solve_triangular_lower};
use crate::model::dina::DinaItem;
use crate::types::DEFAULT_GDINA_PROB;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdinaItem {
    pub item_id: String,
    pub required_attributes: Vec<usize>,
    /// P(correct | reduced pattern l), l in [0, 2^r)
    pub success_probabilities: Vec<f64>,
    #[serde(default)]
    pub defaulted: bool,
}

impl GdinaItem {
    /// Item with every pattern probability set to `p`
    pub fn uniform(item_id: impl Into<String>, required: Vec<usize>, p: f64) -> Self {
        let n = 1usize << required.len();
        Self {
            item_id: item_id.into(),
            required_attributes: required,
            success_probabilities: vec![p; n],
            defaulted: false,
        }
    }

    pub fn with_defaults(item_id: impl Into<String>, required: Vec<usize>) -> Self {
        Self::uniform(item_id, required, DEFAULT_GDINA_PROB)
    }

    /// Expand a DINA item: the full-mastery pattern gets 1 - slip, every other
    /// pattern gets guess
    pub fn from_dina(item: &DinaItem) -> Self {
        let n = 1usize << item.required_attributes.len();
        let success_probabilities = (0..n)
            .map(|l| if l == n - 1 { 1.0 - item.slip } else { item.guess })
            .collect();
        Self {
            item_id: item.item_id.clone(),
            required_attributes: item.required_attributes.clone(),
            success_probabilities,
            defaulted: item.defaulted,
        }
    }

    pub fn num_patterns(&self) -> usize {
        self.success_probabilities.len()
    }

    /// Table lookup by reduced pattern
    #[inline]
    pub fn p_correct(&self, reduced_pattern: usize) -> f64 {
        self.success_probabilities[reduced_pattern]
    }

    pub fn p_correct_for_class(&self, class: usize) -> f64 {
        self.p_correct(reduced_index(class, &self.required_attributes))
    }

    /// Identity-link saturated coefficients.
    ///
    /// delta[0] is the intercept, delta[t] for a single-bit t is a main
    /// effect, multi-bit t are interactions.
    pub fn delta_coefficients(&self) -> Vec<f64> {
        let r = self.required_attributes.len();
        let s = design_matrix(r);
        solve_triangular_lower(&s, &self.success_probabilities, 1 << r)
    }

    /// Inverse of `delta_coefficients`; probabilities are clamped to [0, 1]
    pub fn from_delta(item_id: impl Into<String>, required: Vec<usize>, delta: &[f64]) -> Self {
        let n = 1usize << required.len();
        let s = design_matrix(required.len());
        let success_probabilities = mat_vec_mul(&s, delta, n)
            .into_iter()
            .map(|p| p.clamp(0.0, 1.0))
            .collect();
        Self {
            item_id: item_id.into(),
            required_attributes: required,
            success_probabilities,
            defaulted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_dina_matches_dina_probabilities() {
        let dina = DinaItem::new("x", 0.1, 0.2, vec![0, 2]);
        let g = GdinaItem::from_dina(&dina);
        assert_eq!(g.num_patterns(), 4);
        for class in 0..8 {
            let a = dina.p_correct_for_class(class);
            let b = g.p_correct_for_class(class);
            assert!((a - b).abs() < 1e-12, "class {class}: {a} vs {b}");
        }
    }

    #[test]
    fn test_trivial_item_single_pattern() {
        let g = GdinaItem::with_defaults("t", vec![]);
        assert_eq!(g.num_patterns(), 1);
        assert_eq!(g.p_correct_for_class(0b111), DEFAULT_GDINA_PROB);
    }

    #[test]
    fn test_delta_coefficients() {
        let g = GdinaItem {
            item_id: "x".into(),
            required_attributes: vec![0, 1],
            success_probabilities: vec![0.2, 0.5, 0.4, 0.9],
            defaulted: false,
        };
        let d = g.delta_coefficients();
        assert!((d[0] - 0.2).abs() < 1e-12);
        assert!((d[1] - 0.3).abs() < 1e-12);
        assert!((d[2] - 0.2).abs() < 1e-12);
        // 0.9 - 0.2 - 0.3 - 0.2
        assert!((d[3] - 0.2).abs() < 1e-12);

        let back = GdinaItem::from_delta("x", vec![0, 1], &d);
        for (a, b) in back.success_probabilities.iter().zip(&g.success_probabilities) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
