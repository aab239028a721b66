//! CDM-CAT: adaptive item selection on the latent-class posterior
//!
//! Default criterion is the expected Shannon entropy reduction
//!
//!   dH_j = H(pi) - [P(X_j=1) H(pi | X_j=1) + P(X_j=0) H(pi | X_j=0)]
//!
//! PWKL (posterior-weighted Kullback-Leibler against the current MAP class)
//! is available as an alternative criterion.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::{
    eap, entropy_bits, map_class, profile_from_posterior, update_posterior,
    ClassificationProfile,
};
use crate::error::{CdmError, Result};
use crate::estimator::FittedModel;
use crate::matrix::dot_product;
use crate::qmatrix::QMatrix;
use crate::sanitize::{clamp_probability, has_invalid_values};
use crate::types::EPSILON;

// ==================== Types ====================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    #[default]
    ShannonEntropy,
    Pwkl,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextItem {
    pub item_id: String,
    /// Never negative
    pub expected_entropy_reduction: f64,
    /// Attributes the item requires
    pub target_attributes: Vec<usize>,
}

/// Criterion values for one candidate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScore {
    pub item_id: String,
    /// Unclamped
    pub expected_entropy_reduction: f64,
    pub pwkl: f64,
    pub target_attributes: Vec<usize>,
}

// ==================== Criteria ====================

/// Expected entropy reduction (bits) of administering an item with per-class
/// success probabilities `probs`
pub fn expected_entropy_reduction(posterior: &[f64], probs: &[f64]) -> f64 {
    let current = entropy_bits(posterior);
    let p_correct = dot_product(posterior, probs).clamp(0.0, 1.0);
    let p_wrong = 1.0 - p_correct;

    let branch_entropy = |weights: Vec<f64>, mass: f64| {
        if mass > EPSILON {
            let post: Vec<f64> = weights.into_iter().map(|w| w / mass).collect();
            entropy_bits(&post)
        } else {
            0.0
        }
    };

    let h1 = branch_entropy(
        posterior.iter().zip(probs).map(|(p, q)| p * q).collect(),
        p_correct,
    );
    let h0 = branch_entropy(
        posterior.iter().zip(probs).map(|(p, q)| p * (1.0 - q)).collect(),
        p_wrong,
    );

    current - (p_correct * h1 + p_wrong * h0)
}

fn bernoulli_kl(p: f64, q: f64) -> f64 {
    p * (p / q).ln() + (1.0 - p) * ((1.0 - p) / (1.0 - q)).ln()
}

/// Σ_c π_c KL(P_j(. | MAP) || P_j(. | c))
pub fn pwkl(posterior: &[f64], probs: &[f64]) -> f64 {
    let anchor = probs[map_class(posterior)];
    posterior
        .iter()
        .zip(probs)
        .map(|(&w, &q)| w * bernoulli_kl(anchor, q))
        .sum()
}

fn check_shapes(posterior: &[f64], q_matrix: &QMatrix, fitted: &FittedModel) -> Result<()> {
    if q_matrix.num_attributes() != fitted.num_attributes {
        return Err(CdmError::invalid(format!(
            "Q-matrix has K={}, fitted model has K={}",
            q_matrix.num_attributes(),
            fitted.num_attributes
        )));
    }
    if posterior.len() != fitted.num_classes() {
        return Err(CdmError::invalid(format!(
            "posterior has {} entries, expected 2^K = {}",
            posterior.len(),
            fitted.num_classes()
        )));
    }
    if has_invalid_values(posterior) {
        return Err(CdmError::invalid("posterior contains NaN or infinite values"));
    }
    Ok(())
}

/// Score every known candidate, in ascending item-id order.
///
/// Duplicates are scored once; candidates missing from the Q-matrix or the
/// fitted model are skipped.
pub fn score_candidates<S: AsRef<str>>(
    posterior: &[f64],
    q_matrix: &QMatrix,
    fitted: &FittedModel,
    candidate_pool: &[S],
) -> Result<Vec<CandidateScore>> {
    check_shapes(posterior, q_matrix, fitted)?;

    let mut ids: Vec<&str> = candidate_pool.iter().map(|s| s.as_ref()).collect();
    ids.sort_unstable();
    ids.dedup();

    let params = &fitted.item_params;
    let mut scores = Vec::with_capacity(ids.len());
    for id in ids {
        let (Some(_), Some(j)) = (q_matrix.position(id), params.position(id)) else {
            warn!(item_id = id, "candidate not in Q-matrix or fitted model, skipped");
            continue;
        };
        let probs: Vec<f64> = (0..fitted.num_classes())
            .map(|c| clamp_probability(params.p_correct(j, c)))
            .collect();
        scores.push(CandidateScore {
            item_id: id.to_string(),
            expected_entropy_reduction: expected_entropy_reduction(posterior, &probs),
            pwkl: pwkl(posterior, &probs),
            target_attributes: params.required(j).to_vec(),
        });
    }
    Ok(scores)
}

/// Next item by expected entropy reduction; `None` when no candidate is usable
pub fn select_next_item<S: AsRef<str>>(
    posterior: &[f64],
    q_matrix: &QMatrix,
    fitted: &FittedModel,
    candidate_pool: &[S],
) -> Result<Option<NextItem>> {
    select_next_item_with(
        posterior,
        q_matrix,
        fitted,
        candidate_pool,
        SelectionMethod::ShannonEntropy,
    )
}

/// Next item under the given criterion. Ties go to the lowest item id.
pub fn select_next_item_with<S: AsRef<str>>(
    posterior: &[f64],
    q_matrix: &QMatrix,
    fitted: &FittedModel,
    candidate_pool: &[S],
    method: SelectionMethod,
) -> Result<Option<NextItem>> {
    let scores = score_candidates(posterior, q_matrix, fitted, candidate_pool)?;

    let criterion = |s: &CandidateScore| match method {
        SelectionMethod::ShannonEntropy => s.expected_entropy_reduction,
        SelectionMethod::Pwkl => s.pwkl,
    };

    let mut best: Option<&CandidateScore> = None;
    for s in &scores {
        if best.map_or(true, |b| criterion(s) > criterion(b)) {
            best = Some(s);
        }
    }

    Ok(best.map(|s| NextItem {
        item_id: s.item_id.clone(),
        expected_entropy_reduction: s.expected_entropy_reduction.max(0.0),
        target_attributes: s.target_attributes.clone(),
    }))
}

// ==================== Session ====================

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatConfig {
    pub selection_method: SelectionMethod,
    /// Stop once the best expected entropy reduction falls below this (bits)
    pub entropy_threshold: f64,
    pub min_items: usize,
    pub max_items: usize,
    /// Stop once every attribute's EAP is at least this far from 0.5 toward 0 or 1
    pub decision_threshold: Option<f64>,
}

impl Default for CatConfig {
    fn default() -> Self {
        Self {
            selection_method: SelectionMethod::ShannonEntropy,
            entropy_threshold: 0.01,
            min_items: 5,
            max_items: 30,
            decision_threshold: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatStopReason {
    EntropyThreshold,
    MaxItems,
    AllAttributesDecided,
    PoolExhausted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntropyStep {
    pub item_id: String,
    pub entropy_before: f64,
    pub entropy_after: f64,
}

/// State of one adaptive test
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatSession {
    pub config: CatConfig,
    pub num_attributes: usize,
    pub current_posterior: Vec<f64>,
    pub current_entropy: f64,
    pub items_administered: Vec<String>,
    pub responses: Vec<bool>,
    pub entropy_history: Vec<EntropyStep>,
    pub is_complete: bool,
    pub stopping_reason: Option<CatStopReason>,
}

impl CatSession {
    /// Start from the fitted class priors
    pub fn new(fitted: &FittedModel, config: CatConfig) -> Self {
        let posterior = fitted.class_priors.clone();
        Self {
            config,
            num_attributes: fitted.num_attributes,
            current_entropy: entropy_bits(&posterior),
            current_posterior: posterior,
            items_administered: Vec::new(),
            responses: Vec::new(),
            entropy_history: Vec::new(),
            is_complete: false,
            stopping_reason: None,
        }
    }

    fn finish(&mut self, reason: CatStopReason) {
        debug!(?reason, items = self.items_administered.len(), "CAT session complete");
        self.is_complete = true;
        self.stopping_reason = Some(reason);
    }

    /// Pick the next item from `pool`, excluding items already administered.
    ///
    /// Returns `None` and completes the session when a stopping rule fires.
    pub fn next_item<S: AsRef<str>>(
        &mut self,
        q_matrix: &QMatrix,
        fitted: &FittedModel,
        pool: &[S],
    ) -> Result<Option<NextItem>> {
        if self.is_complete {
            return Ok(None);
        }
        if self.items_administered.len() >= self.config.max_items {
            self.finish(CatStopReason::MaxItems);
            return Ok(None);
        }

        let remaining: Vec<&str> = pool
            .iter()
            .map(|s| s.as_ref())
            .filter(|id| !self.items_administered.iter().any(|a| a.as_str() == *id))
            .collect();

        let next = select_next_item_with(
            &self.current_posterior,
            q_matrix,
            fitted,
            &remaining,
            self.config.selection_method,
        )?;

        match next {
            None => {
                self.finish(CatStopReason::PoolExhausted);
                Ok(None)
            }
            Some(item)
                if self.items_administered.len() >= self.config.min_items
                    && item.expected_entropy_reduction < self.config.entropy_threshold =>
            {
                self.finish(CatStopReason::EntropyThreshold);
                Ok(None)
            }
            Some(item) => Ok(Some(item)),
        }
    }

    /// Bayes-update the posterior with one response
    pub fn record_response(&mut self, item_id: &str, correct: bool, fitted: &FittedModel) -> Result<()> {
        if self.is_complete {
            return Err(CdmError::invalid("CAT session is already complete"));
        }
        if self.items_administered.iter().any(|a| a == item_id) {
            return Err(CdmError::invalid(format!("item '{item_id}' was already administered")));
        }

        let posterior = update_posterior(&self.current_posterior, item_id, correct, fitted)?;
        let entropy_after = entropy_bits(&posterior);
        self.entropy_history.push(EntropyStep {
            item_id: item_id.to_string(),
            entropy_before: self.current_entropy,
            entropy_after,
        });
        self.current_posterior = posterior;
        self.current_entropy = entropy_after;
        self.items_administered.push(item_id.to_string());
        self.responses.push(correct);

        let n = self.items_administered.len();
        if n >= self.config.max_items {
            self.finish(CatStopReason::MaxItems);
        } else if n >= self.config.min_items && self.all_attributes_decided() {
            self.finish(CatStopReason::AllAttributesDecided);
        }
        Ok(())
    }

    fn all_attributes_decided(&self) -> bool {
        let Some(threshold) = self.config.decision_threshold else {
            return false;
        };
        eap(&self.current_posterior, self.num_attributes)
            .iter()
            .all(|&p| p >= threshold || p <= 1.0 - threshold)
    }

    pub fn profile(&self) -> ClassificationProfile {
        profile_from_posterior(
            self.current_posterior.clone(),
            self.num_attributes,
            self.items_administered.len(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::tests::fixture;

    #[test]
    fn test_reduction_non_negative() {
        let (q, fitted) = fixture();
        let posteriors = [
            vec![0.25; 4],
            vec![0.7, 0.1, 0.1, 0.1],
            vec![0.01, 0.01, 0.01, 0.97],
            vec![1.0, 0.0, 0.0, 0.0],
        ];
        for post in &posteriors {
            let scores = score_candidates(post, &q, &fitted, &["i1", "i2", "i3", "i4", "i5"]).unwrap();
            for s in &scores {
                assert!(s.expected_entropy_reduction >= -1e-12, "{s:?}");
                assert!(s.pwkl >= -1e-12);
            }
        }
    }

    #[test]
    fn test_respects_candidate_pool() {
        let (q, fitted) = fixture();
        let prior = fitted.class_priors.clone();
        let next = select_next_item(&prior, &q, &fitted, &["i3", "i4"]).unwrap().unwrap();
        assert!(next.item_id == "i3" || next.item_id == "i4");
        // i3 and i4 are identical: tie goes to the lowest id
        assert_eq!(next.item_id, "i3");
        assert_eq!(next.target_attributes, vec![1]);
    }

    #[test]
    fn test_empty_or_unknown_pool() {
        let (q, fitted) = fixture();
        let prior = fitted.class_priors.clone();
        let empty: [&str; 0] = [];
        assert!(select_next_item(&prior, &q, &fitted, &empty).unwrap().is_none());
        assert!(select_next_item(&prior, &q, &fitted, &["ghost"]).unwrap().is_none());
    }

    #[test]
    fn test_posterior_length_checked() {
        let (q, fitted) = fixture();
        let r = select_next_item(&[0.5, 0.5], &q, &fitted, &["i1"]);
        assert!(matches!(r, Err(CdmError::InvalidInput(_))));

        let nan = select_next_item(&[f64::NAN, 0.5, 0.25, 0.25], &q, &fitted, &["i1"]);
        assert!(nan.is_err());
    }

    #[test]
    fn test_pwkl_selection() {
        let (q, fitted) = fixture();
        let post = vec![0.05, 0.05, 0.05, 0.85];
        let next = select_next_item_with(&post, &q, &fitted, &["i1", "i5"], SelectionMethod::Pwkl)
            .unwrap()
            .unwrap();
        // i5 separates the MAP class from all three others
        assert_eq!(next.item_id, "i5");
    }

    #[test]
    fn test_session_runs_to_completion() {
        let (q, fitted) = fixture();
        let pool = ["i1", "i2", "i3", "i4", "i5"];
        let mut session = CatSession::new(
            &fitted,
            CatConfig {
                min_items: 1,
                max_items: 10,
                ..CatConfig::default()
            },
        );

        while let Some(item) = session.next_item(&q, &fitted, &pool).unwrap() {
            assert!(!session.items_administered.contains(&item.item_id));
            // 被试掌握属性 0，未掌握属性 1
            let correct = item.target_attributes == vec![0];
            session.record_response(&item.item_id, correct, &fitted).unwrap();
        }

        assert!(session.is_complete);
        assert!(session.stopping_reason.is_some());
        for step in &session.entropy_history {
            assert!(step.entropy_before >= 0.0 && step.entropy_after >= 0.0);
        }
        assert_eq!(session.profile().map_estimate, vec![true, false]);
        assert!(session.record_response("i1", true, &fitted).is_err());
    }

    #[test]
    fn test_session_max_items_and_duplicates() {
        let (q, fitted) = fixture();
        let mut session = CatSession::new(
            &fitted,
            CatConfig {
                min_items: 0,
                max_items: 2,
                entropy_threshold: 0.0,
                ..CatConfig::default()
            },
        );
        session.record_response("i1", true, &fitted).unwrap();
        assert!(session.record_response("i1", true, &fitted).is_err());
        session.record_response("i3", false, &fitted).unwrap();
        assert!(session.is_complete);
        assert_eq!(session.stopping_reason, Some(CatStopReason::MaxItems));
        assert!(session.next_item(&q, &fitted, &["i2"]).unwrap().is_none());
    }

    #[test]
    fn test_session_all_attributes_decided() {
        let (_, fitted) = fixture();
        let mut session = CatSession::new(
            &fitted,
            CatConfig {
                min_items: 1,
                decision_threshold: Some(0.9),
                ..CatConfig::default()
            },
        );
        session.record_response("i5", true, &fitted).unwrap();
        assert_eq!(session.stopping_reason, Some(CatStopReason::AllAttributesDecided));
    }
}
