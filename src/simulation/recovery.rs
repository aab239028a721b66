//! Recovery study driver and statistics

use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify::classify_matrix;
use crate::error::{CdmError, Result};
use crate::estimator::{estimate, EmOptions, FittedModel};
use crate::latent::{has_attribute, LatentClasses};
use crate::qmatrix::QMatrix;
use crate::simulation::report::{
    DinaRecovery, GdinaSummary, RecoveryReport, ReportMetadata, SampleSizeResult, TrueValues,
};
use crate::simulation::{
    generate_class_priors, generate_true_parameters, simulate_responses, Lcg, SimulatedData,
    SimulationConfig, TrueParameters,
};
use crate::types::ModelType;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub rmse: f64,
    /// mean(estimate - truth)
    pub bias: f64,
    /// Pearson correlation; 0 when either side has no variance
    pub r: f64,
}

pub fn recovery_stats(truth: &[f64], estimate: &[f64]) -> RecoveryStats {
    let n = truth.len().min(estimate.len());
    if n == 0 {
        return RecoveryStats::default();
    }
    let nf = n as f64;
    let mean_t = truth[..n].iter().sum::<f64>() / nf;
    let mean_e = estimate[..n].iter().sum::<f64>() / nf;

    let (mut mse, mut bias, mut cov, mut var_t, mut var_e) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (&t, &e) in truth.iter().zip(estimate) {
        let dt = t - mean_t;
        let de = e - mean_e;
        mse += (e - t).powi(2);
        bias += e - t;
        cov += dt * de;
        var_t += dt * dt;
        var_e += de * de;
    }

    RecoveryStats {
        rmse: (mse / nf).sqrt(),
        bias: bias / nf,
        r: if var_t * var_e > 0.0 {
            cov / (var_t * var_e).sqrt()
        } else {
            0.0
        },
    }
}

/// Share of respondents whose MAP class is the true class, and share of
/// (respondent, attribute) pairs whose thresholded EAP matches the true bit.
/// An EAP of exactly 0.5 counts as mastered.
fn classification_accuracy(
    data: &SimulatedData,
    fitted: &FittedModel,
) -> Result<(f64, f64)> {
    let profiles = classify_matrix(&data.responses, fitted)?;
    let k = fitted.num_attributes;
    let n = profiles.len().max(1) as f64;

    let mut pattern_hits = 0usize;
    let mut attribute_hits = 0usize;
    for (profile, &truth) in profiles.iter().zip(&data.true_classes) {
        if profile.latent_class == truth {
            pattern_hits += 1;
        }
        attribute_hits += (0..k)
            .filter(|&a| (profile.eap_estimate[a] >= 0.5) == has_attribute(truth, a))
            .count();
    }
    Ok((pattern_hits as f64 / n, attribute_hits as f64 / (n * k as f64)))
}

/// Whether the LL history never drops by more than `tolerance`
fn history_is_monotone(history: &[f64], tolerance: f64) -> bool {
    history.windows(2).all(|w| w[1] >= w[0] - tolerance)
}

fn evaluate_sample(
    n: usize,
    data: &SimulatedData,
    q_matrix: &QMatrix,
    truth: &TrueParameters,
    config: &SimulationConfig,
) -> Result<SampleSizeResult> {
    let started = Instant::now();

    let dina_opts = EmOptions {
        model_type: ModelType::Dina,
        ..config.em.clone()
    };
    let dina = estimate(&data.responses, q_matrix, &dina_opts)?;
    let items = dina
        .dina_items()
        .ok_or_else(|| CdmError::invalid("DINA fit returned non-DINA parameters"))?;
    let est_slip: Vec<f64> = items.iter().map(|it| it.slip).collect();
    let est_guess: Vec<f64> = items.iter().map(|it| it.guess).collect();
    let (pattern_recovery, attribute_accuracy) = classification_accuracy(data, &dina)?;

    let gdina = if config.fit_gdina {
        let gdina_opts = EmOptions {
            model_type: ModelType::Gdina,
            ..config.em.clone()
        };
        let fitted = estimate(&data.responses, q_matrix, &gdina_opts)?;
        Some(GdinaSummary {
            iterations: fitted.iterations,
            converged: fitted.converged,
            fit: fitted.fit,
        })
    } else {
        None
    };

    let aic_winner = gdina.as_ref().map(|g| {
        if dina.fit.aic <= g.fit.aic {
            ModelType::Dina
        } else {
            ModelType::Gdina
        }
    });

    info!(
        n,
        elapsed_ms = started.elapsed().as_millis() as u64,
        log_likelihood = dina.final_log_likelihood,
        converged = dina.converged,
        "sample size evaluated"
    );

    Ok(SampleSizeResult {
        n,
        dina: DinaRecovery {
            slip_recovery: recovery_stats(&truth.slip, &est_slip),
            guess_recovery: recovery_stats(&truth.guess, &est_guess),
            iterations: dina.iterations,
            converged: dina.converged,
            stop_reason: dina.stop_reason,
            log_likelihood: dina.final_log_likelihood,
            log_likelihood_monotone: history_is_monotone(
                &dina.log_likelihood_history,
                config.em.tolerance,
            ),
            fit: dina.fit,
            pattern_recovery,
            attribute_accuracy,
        },
        gdina,
        aic_winner,
    })
}

/// Run the full study described by `config`
pub fn run_recovery_study(config: &SimulationConfig) -> Result<RecoveryReport> {
    config.validate()?;
    let q_matrix = config.build_q_matrix()?;
    let classes = LatentClasses::new(config.num_attributes)?;

    let mut rng = Lcg::new(config.seed);
    let truth = generate_true_parameters(q_matrix.num_items(), &config.true_parameters, &mut rng);
    let class_priors = generate_class_priors(classes, &config.class_priors, &mut rng);

    info!(
        k = config.num_attributes,
        j = q_matrix.num_items(),
        seed = config.seed,
        sample_sizes = ?config.sample_sizes,
        "starting recovery study"
    );

    // 数据按样本量顺序生成，拟合可并行
    let datasets: Vec<(usize, SimulatedData)> = config
        .sample_sizes
        .iter()
        .map(|&n| {
            simulate_responses(n, &q_matrix, &truth, &class_priors, &mut rng).map(|d| (n, d))
        })
        .collect::<Result<_>>()?;

    let recovery_by_n: Vec<SampleSizeResult> = datasets
        .par_iter()
        .map(|(n, data)| evaluate_sample(*n, data, &q_matrix, &truth, config))
        .collect::<Result<_>>()?;

    Ok(RecoveryReport {
        metadata: ReportMetadata {
            num_attributes: config.num_attributes,
            num_items: q_matrix.num_items(),
            seed: config.seed,
            sample_sizes: config.sample_sizes.clone(),
            qmatrix_source: "area_blueprint".to_string(),
            areas: config.areas.clone(),
        },
        true_params: TrueValues {
            slip: truth.slip,
            guess: truth.guess,
            class_priors,
        },
        recovery_by_n,
    })
}
