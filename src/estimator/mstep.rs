//! M-step: closed-form updates from expected counts

use crate::estimator::estep::ExpectedCounts;
use crate::latent::reduced_index;
use crate::model::dina::{constrain, ideal_response_for_class, DinaBounds};
use crate::model::{DinaItem, GdinaItem};
use crate::sanitize::floor_and_normalize;
use crate::types::EPSILON;

/// π_c = mean posterior, floored at `min_class_prior` and renormalized
pub fn update_priors(counts: &ExpectedCounts, min_class_prior: f64) -> Vec<f64> {
    let total: f64 = counts.class_mass.iter().sum();
    let mut priors: Vec<f64> = if total > EPSILON {
        counts.class_mass.iter().map(|m| m / total).collect()
    } else {
        vec![1.0 / counts.num_classes() as f64; counts.num_classes()]
    };
    floor_and_normalize(&mut priors, min_class_prior);
    priors
}

/// DINA slip/guess from the expected correct rates among eta = 1 / eta = 0.
///
/// A side with no expected mass keeps its previous value.
pub fn update_dina(prev: &[DinaItem], counts: &ExpectedCounts, bounds: DinaBounds) -> Vec<DinaItem> {
    prev.iter()
        .enumerate()
        .map(|(j, item)| {
            let (mut t1, mut c1, mut t0, mut c0) = (0.0, 0.0, 0.0, 0.0);
            for (c, (&a, &r)) in counts
                .attempts_row(j)
                .iter()
                .zip(counts.correct_row(j))
                .enumerate()
            {
                if ideal_response_for_class(&item.required_attributes, c) {
                    t1 += a;
                    c1 += r;
                } else {
                    t0 += a;
                    c0 += r;
                }
            }

            let slip = if t1 > EPSILON { 1.0 - c1 / t1 } else { item.slip };
            let guess = if t0 > EPSILON { c0 / t0 } else { item.guess };
            let (slip, guess) = constrain(slip, guess, bounds);

            DinaItem {
                slip,
                guess,
                ..item.clone()
            }
        })
        .collect()
}

/// G-DINA pattern probabilities: expected correct rate per reduced pattern,
/// clamped to [min_param, max_param]
pub fn update_gdina(
    prev: &[GdinaItem],
    counts: &ExpectedCounts,
    min_param: f64,
    max_param: f64,
) -> Vec<GdinaItem> {
    prev.iter()
        .enumerate()
        .map(|(j, item)| {
            let n = item.num_patterns();
            let mut attempts = vec![0.0; n];
            let mut correct = vec![0.0; n];
            for (c, (&a, &r)) in counts
                .attempts_row(j)
                .iter()
                .zip(counts.correct_row(j))
                .enumerate()
            {
                let l = reduced_index(c, &item.required_attributes);
                attempts[l] += a;
                correct[l] += r;
            }

            let success_probabilities = item
                .success_probabilities
                .iter()
                .enumerate()
                .map(|(l, &old)| {
                    if attempts[l] > EPSILON {
                        (correct[l] / attempts[l]).clamp(min_param, max_param)
                    } else {
                        old
                    }
                })
                .collect();

            GdinaItem {
                success_probabilities,
                ..item.clone()
            }
        })
        .collect()
}
