//! Student classification
//!
//! Posterior over latent classes for one respondent given a fitted model, and
//! the summaries derived from it (MAP, EAP, entropy).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CdmError, Result};
use crate::estimator::FittedModel;
use crate::latent::has_attribute;
use crate::model::ProbabilityTable;
use crate::qmatrix::QMatrix;
use crate::sanitize::{clamp_probability, normalize_distribution, safe_ln_prior};
use crate::types::ResponseMatrix;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationProfile {
    /// MAP latent class index
    pub latent_class: usize,
    /// P(alpha_k = 1 | responses)
    pub eap_estimate: Vec<f64>,
    /// Bits of the MAP class
    pub map_estimate: Vec<bool>,
    pub posterior_probabilities: Vec<f64>,
    /// Shannon entropy in bits, in [0, K]
    pub posterior_entropy: f64,
    /// Posterior mass on the MAP class
    pub classification_confidence: f64,
    /// Responses that entered the posterior
    pub administered_items: usize,
    pub mastered_attributes: Vec<usize>,
    pub unmastered_attributes: Vec<usize>,
}

impl ClassificationProfile {
    /// 1 - H / K
    pub fn normalized_entropy_confidence(&self) -> f64 {
        let k = self.map_estimate.len();
        if k == 0 {
            return 0.0;
        }
        (1.0 - self.posterior_entropy / k as f64).clamp(0.0, 1.0)
    }

    pub fn meets_minimum(&self, minimum: usize) -> bool {
        self.administered_items >= minimum
    }
}

/// Shannon entropy in bits; 0 log 0 = 0
pub fn entropy_bits(p: &[f64]) -> f64 {
    let h: f64 = p
        .iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| -v * v.log2())
        .sum();
    h.max(0.0)
}

/// Index of the largest entry; ties go to the lowest index
pub fn map_class(p: &[f64]) -> usize {
    let mut best = 0;
    for (c, &v) in p.iter().enumerate().skip(1) {
        if v > p[best] {
            best = c;
        }
    }
    best
}

/// Per-attribute marginal mastery probabilities
pub fn eap(p: &[f64], num_attributes: usize) -> Vec<f64> {
    (0..num_attributes)
        .map(|k| {
            p.iter()
                .enumerate()
                .filter(|(c, _)| has_attribute(*c, k))
                .map(|(_, &v)| v)
                .sum()
        })
        .collect()
}

/// Summaries of a posterior
pub fn profile_from_posterior(
    posterior: Vec<f64>,
    num_attributes: usize,
    administered_items: usize,
) -> ClassificationProfile {
    let latent_class = map_class(&posterior);
    let map_estimate: Vec<bool> = (0..num_attributes)
        .map(|k| has_attribute(latent_class, k))
        .collect();
    let (mastered_attributes, unmastered_attributes): (Vec<usize>, Vec<usize>) =
        (0..num_attributes).partition(|&k| map_estimate[k]);

    ClassificationProfile {
        latent_class,
        eap_estimate: eap(&posterior, num_attributes),
        map_estimate,
        posterior_entropy: entropy_bits(&posterior),
        classification_confidence: posterior[latent_class],
        posterior_probabilities: posterior,
        administered_items,
        mastered_attributes,
        unmastered_attributes,
    }
}

/// Map item-keyed responses to fitted-model positions, sorted by position.
///
/// Items unknown to the Q-matrix or the fitted model are skipped.
fn resolve_responses(
    responses: &HashMap<String, bool>,
    q_matrix: &QMatrix,
    fitted: &FittedModel,
) -> Result<Vec<(usize, bool)>> {
    if q_matrix.num_attributes() != fitted.num_attributes {
        return Err(CdmError::invalid(format!(
            "Q-matrix has K={}, fitted model has K={}",
            q_matrix.num_attributes(),
            fitted.num_attributes
        )));
    }

    let params = &fitted.item_params;
    let mut resolved = Vec::with_capacity(responses.len());
    for (item_id, &correct) in responses {
        let (Some(qj), Some(fj)) = (q_matrix.position(item_id), params.position(item_id)) else {
            continue;
        };
        if q_matrix.required(qj) != params.required(fj) {
            return Err(CdmError::invalid(format!(
                "item '{item_id}' requires {:?} in the Q-matrix but {:?} in the fitted model",
                q_matrix.required(qj),
                params.required(fj)
            )));
        }
        resolved.push((fj, correct));
    }
    resolved.sort_unstable_by_key(|&(j, _)| j);
    Ok(resolved)
}

fn posterior_from_resolved(fitted: &FittedModel, observations: &[(usize, bool)]) -> Vec<f64> {
    let table = ProbabilityTable::build(&fitted.item_params, fitted.num_classes());
    let log_priors: Vec<f64> = fitted.class_priors.iter().map(|&p| safe_ln_prior(p)).collect();
    let mut posterior = vec![0.0; fitted.num_classes()];
    table.posterior_into(&log_priors, observations.iter().copied(), &mut posterior);
    posterior
}

/// Posterior over classes for item-keyed responses
pub fn posterior_for(
    responses: &HashMap<String, bool>,
    q_matrix: &QMatrix,
    fitted: &FittedModel,
) -> Result<Vec<f64>> {
    let observations = resolve_responses(responses, q_matrix, fitted)?;
    Ok(posterior_from_resolved(fitted, &observations))
}

/// One Bayes update of an existing posterior with a single response
pub fn update_posterior(
    posterior: &[f64],
    item_id: &str,
    correct: bool,
    fitted: &FittedModel,
) -> Result<Vec<f64>> {
    if posterior.len() != fitted.num_classes() {
        return Err(CdmError::invalid(format!(
            "posterior has {} entries, expected {}",
            posterior.len(),
            fitted.num_classes()
        )));
    }
    let j = fitted
        .item_params
        .position(item_id)
        .ok_or_else(|| CdmError::invalid(format!("item '{item_id}' is not in the fitted model")))?;

    let mut updated: Vec<f64> = posterior
        .iter()
        .enumerate()
        .map(|(c, &p)| {
            let pc = clamp_probability(fitted.item_params.p_correct(j, c));
            p * if correct { pc } else { 1.0 - pc }
        })
        .collect();
    normalize_distribution(&mut updated);
    Ok(updated)
}

/// Classify one respondent. Any number of responses is accepted; with none
/// the posterior equals the class priors.
pub fn classify(
    responses: &HashMap<String, bool>,
    q_matrix: &QMatrix,
    fitted: &FittedModel,
) -> Result<ClassificationProfile> {
    let observations = resolve_responses(responses, q_matrix, fitted)?;
    let posterior = posterior_from_resolved(fitted, &observations);
    Ok(profile_from_posterior(
        posterior,
        fitted.num_attributes,
        observations.len(),
    ))
}

/// Classify every row of a response matrix whose columns follow the fitted
/// model's item order
pub fn classify_matrix(
    responses: &ResponseMatrix,
    fitted: &FittedModel,
) -> Result<Vec<ClassificationProfile>> {
    if responses.num_items() != fitted.item_params.len() {
        return Err(CdmError::invalid(format!(
            "response matrix has {} columns, fitted model has {} items",
            responses.num_items(),
            fitted.item_params.len()
        )));
    }

    let table = ProbabilityTable::build(&fitted.item_params, fitted.num_classes());
    let log_priors: Vec<f64> = fitted.class_priors.iter().map(|&p| safe_ln_prior(p)).collect();
    Ok((0..responses.num_respondents())
        .map(|i| {
            let mut posterior = vec![0.0; fitted.num_classes()];
            table.posterior_into(&log_priors, responses.observations(i), &mut posterior);
            let administered = responses.observations(i).count();
            profile_from_posterior(posterior, fitted.num_attributes, administered)
        })
        .collect())
}

/// `classify`, refusing to answer with fewer than `minimum` usable responses
pub fn classify_with_minimum(
    responses: &HashMap<String, bool>,
    q_matrix: &QMatrix,
    fitted: &FittedModel,
    minimum: usize,
) -> Result<ClassificationProfile> {
    let profile = classify(responses, q_matrix, fitted)?;
    if !profile.meets_minimum(minimum) {
        return Err(CdmError::InsufficientData {
            available: profile.administered_items,
            required: minimum,
        });
    }
    Ok(profile)
}
