//! Likelihood models
//!
//! `ItemParameters` holds either DINA or G-DINA items; `ProbabilityTable`
//! flattens them into an item x class table of P(correct) and its logarithms,
//! which is what the E-step, the classifier and the CAT selector consume.

pub mod dina;
pub mod gdina;

use serde::{Deserialize, Serialize};

pub use dina::DinaItem;
pub use gdina::GdinaItem;

use crate::sanitize::{clamp_probability, log_sum_exp, normalize_distribution};
use crate::types::ModelType;

// ==================== Item Parameters ====================

/// Fitted item parameters, aligned with the Q-matrix item order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "modelType", content = "items", rename_all = "lowercase")]
pub enum ItemParameters {
    Dina(Vec<DinaItem>),
    Gdina(Vec<GdinaItem>),
}

impl ItemParameters {
    pub fn model_type(&self) -> ModelType {
        match self {
            ItemParameters::Dina(_) => ModelType::Dina,
            ItemParameters::Gdina(_) => ModelType::Gdina,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ItemParameters::Dina(items) => items.len(),
            ItemParameters::Gdina(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn item_id(&self, j: usize) -> &str {
        match self {
            ItemParameters::Dina(items) => &items[j].item_id,
            ItemParameters::Gdina(items) => &items[j].item_id,
        }
    }

    pub fn required(&self, j: usize) -> &[usize] {
        match self {
            ItemParameters::Dina(items) => &items[j].required_attributes,
            ItemParameters::Gdina(items) => &items[j].required_attributes,
        }
    }

    pub fn position(&self, item_id: &str) -> Option<usize> {
        (0..self.len()).find(|&j| self.item_id(j) == item_id)
    }

    /// P(correct | class) for item j
    #[inline]
    pub fn p_correct(&self, j: usize, class: usize) -> f64 {
        match self {
            ItemParameters::Dina(items) => items[j].p_correct_for_class(class),
            ItemParameters::Gdina(items) => items[j].p_correct_for_class(class),
        }
    }

    /// Free item parameters: 2 per DINA item, 2^r_j per G-DINA item
    pub fn num_parameters(&self) -> usize {
        match self {
            ItemParameters::Dina(items) => 2 * items.len(),
            ItemParameters::Gdina(items) => items.iter().map(|it| it.num_patterns()).sum(),
        }
    }

    pub fn is_defaulted(&self, j: usize) -> bool {
        match self {
            ItemParameters::Dina(items) => items[j].defaulted,
            ItemParameters::Gdina(items) => items[j].defaulted,
        }
    }

    /// View the parameters as G-DINA pattern tables
    pub fn to_gdina(&self) -> Vec<GdinaItem> {
        match self {
            ItemParameters::Dina(items) => items.iter().map(GdinaItem::from_dina).collect(),
            ItemParameters::Gdina(items) => items.clone(),
        }
    }
}

// ==================== Probability Table ====================

/// Item x class table of P(correct), ln P and ln(1 - P).
///
/// Row j is contiguous over classes. Probabilities are clamped before the
/// logarithms are taken, so every entry is finite.
#[derive(Clone, Debug)]
pub struct ProbabilityTable {
    num_items: usize,
    num_classes: usize,
    p: Vec<f64>,
    log_p: Vec<f64>,
    log_q: Vec<f64>,
}

impl ProbabilityTable {
    pub fn build(params: &ItemParameters, num_classes: usize) -> Self {
        let num_items = params.len();
        let n = num_items * num_classes;
        let mut p = Vec::with_capacity(n);
        let mut log_p = Vec::with_capacity(n);
        let mut log_q = Vec::with_capacity(n);

        for j in 0..num_items {
            for c in 0..num_classes {
                let pc = clamp_probability(params.p_correct(j, c));
                p.push(pc);
                log_p.push(pc.ln());
                log_q.push((1.0 - pc).ln());
            }
        }

        Self {
            num_items,
            num_classes,
            p,
            log_p,
            log_q,
        }
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// P(correct | c) for every class
    #[inline]
    pub fn row(&self, j: usize) -> &[f64] {
        let c = self.num_classes;
        &self.p[j * c..(j + 1) * c]
    }

    #[inline]
    pub fn log_row(&self, j: usize, correct: bool) -> &[f64] {
        let c = self.num_classes;
        let src = if correct { &self.log_p } else { &self.log_q };
        &src[j * c..(j + 1) * c]
    }

    /// Posterior over classes for one response vector.
    ///
    /// `out` receives the normalized posterior; the return value is the log
    /// marginal likelihood ln Σ_c π_c Π_j P(x_j | c).
    pub fn posterior_into<I>(&self, log_priors: &[f64], observations: I, out: &mut [f64]) -> f64
    where
        I: IntoIterator<Item = (usize, bool)>,
    {
        out.copy_from_slice(log_priors);
        for (j, x) in observations {
            for (o, &l) in out.iter_mut().zip(self.log_row(j, x)) {
                *o += l;
            }
        }

        let lse = log_sum_exp(out);
        if lse.is_finite() {
            for o in out.iter_mut() {
                *o = (*o - lse).exp();
            }
        } else {
            out.iter_mut().for_each(|o| *o = 0.0);
        }
        normalize_distribution(out);
        lse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latent::LatentClasses;
    use crate::sanitize::is_distribution;

    fn two_item_dina() -> ItemParameters {
        ItemParameters::Dina(vec![
            DinaItem::new("a", 0.1, 0.2, vec![0]),
            DinaItem::new("b", 0.1, 0.2, vec![1]),
        ])
    }

    #[test]
    fn test_num_parameters() {
        assert_eq!(two_item_dina().num_parameters(), 4);
        let g = ItemParameters::Gdina(vec![
            GdinaItem::with_defaults("a", vec![0, 1]),
            GdinaItem::with_defaults("b", vec![1]),
        ]);
        assert_eq!(g.num_parameters(), 6);
        assert_eq!(g.model_type(), ModelType::Gdina);
    }

    #[test]
    fn test_posterior_no_observations_equals_prior() {
        let params = two_item_dina();
        let lc = LatentClasses::new(2).unwrap();
        let table = ProbabilityTable::build(&params, lc.num_classes());
        let prior = vec![0.1, 0.2, 0.3, 0.4];
        let log_prior: Vec<f64> = prior.iter().map(|p: &f64| p.ln()).collect();
        let mut post = vec![0.0; 4];
        let ll = table.posterior_into(&log_prior, std::iter::empty(), &mut post);
        assert!(ll.abs() < 1e-12);
        for (a, b) in post.iter().zip(prior.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_posterior_matches_direct_bayes() {
        let params = two_item_dina();
        let table = ProbabilityTable::build(&params, 4);
        let log_prior = vec![(0.25f64).ln(); 4];
        let mut post = vec![0.0; 4];
        let ll = table.posterior_into(&log_prior, vec![(0, true), (1, false)], &mut post);

        // 类别 0b01 掌握属性 0: P = 0.9 * 0.8
        let unnorm = [0.2 * 0.8, 0.9 * 0.8, 0.2 * 0.1, 0.9 * 0.1];
        let total: f64 = unnorm.iter().map(|u| u * 0.25).sum();
        assert!((ll - total.ln()).abs() < 1e-12);
        for c in 0..4 {
            assert!((post[c] - unnorm[c] * 0.25 / total).abs() < 1e-12);
        }
        assert!(is_distribution(&post, 1e-12));
    }

    #[test]
    fn test_serde_tagged_shape() {
        let json = serde_json::to_value(two_item_dina()).unwrap();
        assert_eq!(json["modelType"], "dina");
        assert_eq!(json["items"][0]["itemId"], "a");
        assert_eq!(json["items"][1]["requiredAttributes"][0], 1);
    }
}
