//! Parameter-recovery simulation
//!
//! Generates synthetic DINA data from known parameters, refits it and reports
//! how well the estimator recovers the truth. One `Lcg` drives the whole study
//! in a fixed order: true item parameters, class priors, then the respondents
//! of each sample size.

pub mod lcg;
pub mod recovery;
pub mod report;

use serde::{Deserialize, Serialize};

pub use lcg::{BetaSampler, Lcg};
pub use recovery::{recovery_stats, run_recovery_study, RecoveryStats};
pub use report::{RecoveryReport, SampleSizeResult};

use crate::error::{CdmError, Result};
use crate::estimator::EmOptions;
use crate::latent::LatentClasses;
use crate::model::dina::ideal_response_for_class;
use crate::qmatrix::QMatrix;
use crate::types::{ResponseMatrix, MAX_ATTRIBUTES};

// ==================== Configuration ====================

/// A block of items sharing one Q-matrix row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaBlueprint {
    pub name: String,
    pub num_items: usize,
    pub required_attributes: Vec<usize>,
}

impl AreaBlueprint {
    pub fn new(name: impl Into<String>, num_items: usize, required: &[usize]) -> Self {
        Self {
            name: name.into(),
            num_items,
            required_attributes: required.to_vec(),
        }
    }

    /// `item_<first three chars of area>_<01-based index>`
    fn item_id(&self, i: usize) -> String {
        let prefix: String = self.name.chars().take(3).collect();
        format!("item_{prefix}_{:02}", i + 1)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrueParameterSource {
    /// slip, guess ~ Beta(a, b), redrawn together while slip + guess >= max_sum
    Beta {
        a: f64,
        b: f64,
        max_sum: f64,
        #[serde(default)]
        sampler: BetaSampler,
    },
    Fixed { slip: f64, guess: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassPriorShape {
    Uniform,
    /// w_c = exp(-0.5 (m_c - center)^2 / spread) * (1 - noise/2 + noise u),
    /// m_c = number of mastered attributes
    Bell { center: f64, spread: f64, noise: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulationConfig {
    pub num_attributes: usize,
    pub areas: Vec<AreaBlueprint>,
    pub sample_sizes: Vec<usize>,
    pub seed: u32,
    pub true_parameters: TrueParameterSource,
    pub class_priors: ClassPriorShape,
    pub em: EmOptions,
    pub fit_gdina: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_attributes: 6,
            areas: exam_blueprint(),
            sample_sizes: vec![30, 50, 100, 200, 500],
            seed: 42,
            true_parameters: TrueParameterSource::Beta {
                a: 2.0,
                b: 8.0,
                max_sum: 0.95,
                sampler: BetaSampler::Reference,
            },
            class_priors: ClassPriorShape::Bell {
                center: 2.5,
                spread: 2.0,
                noise: 0.4,
            },
            em: EmOptions::default(),
            fit_gdina: true,
        }
    }
}

/// K=6, J=100 licensing-exam blueprint: five clinical areas
pub fn exam_blueprint() -> Vec<AreaBlueprint> {
    vec![
        AreaBlueprint::new("clinica_medica", 25, &[0, 1, 2]),
        AreaBlueprint::new("cirurgia", 20, &[2, 3, 5]),
        AreaBlueprint::new("ginecologia_obstetricia", 20, &[1, 3, 4]),
        AreaBlueprint::new("pediatria", 20, &[0, 1, 4]),
        AreaBlueprint::new("saude_coletiva", 15, &[1, 4]),
    ]
}

impl SimulationConfig {
    pub fn num_items(&self) -> usize {
        self.areas.iter().map(|a| a.num_items).sum()
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_attributes == 0 || self.num_attributes > MAX_ATTRIBUTES {
            return Err(CdmError::invalid(format!(
                "K={} outside supported range 1..={MAX_ATTRIBUTES}",
                self.num_attributes
            )));
        }
        if self.num_items() == 0 {
            return Err(CdmError::invalid("blueprint has no items"));
        }
        for area in &self.areas {
            if let Some(&k) = area
                .required_attributes
                .iter()
                .find(|&&k| k >= self.num_attributes)
            {
                return Err(CdmError::invalid(format!(
                    "area '{}' requires attribute {k}, K={}",
                    area.name, self.num_attributes
                )));
            }
        }
        if self.sample_sizes.is_empty() || self.sample_sizes.contains(&0) {
            return Err(CdmError::invalid("sample sizes must be non-empty and positive"));
        }
        match self.true_parameters {
            TrueParameterSource::Beta { a, b, max_sum, .. } => {
                if !(a > 0.0 && b > 0.0 && max_sum > 0.0 && max_sum <= 2.0) {
                    return Err(CdmError::invalid(format!(
                        "invalid Beta source a={a} b={b} max_sum={max_sum}"
                    )));
                }
            }
            TrueParameterSource::Fixed { slip, guess } => {
                if !((0.0..1.0).contains(&slip) && (0.0..1.0).contains(&guess) && slip + guess < 1.0)
                {
                    return Err(CdmError::invalid(format!(
                        "fixed parameters need slip + guess < 1, got {slip} + {guess}"
                    )));
                }
            }
        }
        if let ClassPriorShape::Bell { spread, noise, .. } = self.class_priors {
            if !(spread > 0.0 && (0.0..2.0).contains(&noise)) {
                return Err(CdmError::invalid(format!(
                    "invalid bell prior spread={spread} noise={noise}"
                )));
            }
        }
        Ok(())
    }

    /// Q-matrix of the blueprint, areas in order
    pub fn build_q_matrix(&self) -> Result<QMatrix> {
        let k = self.num_attributes;
        let rows = self
            .areas
            .iter()
            .flat_map(|area| {
                (0..area.num_items).map(move |i| {
                    let mut row = vec![false; k];
                    for &a in &area.required_attributes {
                        if a < k {
                            row[a] = true;
                        }
                    }
                    (area.item_id(i), row)
                })
            })
            .collect();
        QMatrix::from_bool_rows(k, rows)
    }
}

// ==================== Generation ====================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrueParameters {
    pub slip: Vec<f64>,
    pub guess: Vec<f64>,
}

pub fn generate_true_parameters(
    num_items: usize,
    source: &TrueParameterSource,
    rng: &mut Lcg,
) -> TrueParameters {
    let mut slip = Vec::with_capacity(num_items);
    let mut guess = Vec::with_capacity(num_items);
    for _ in 0..num_items {
        let (s, g) = match *source {
            TrueParameterSource::Beta {
                a,
                b,
                max_sum,
                sampler,
            } => loop {
                let s = rng.beta_with(a, b, sampler);
                let g = rng.beta_with(a, b, sampler);
                if s + g < max_sum {
                    break (s, g);
                }
            },
            TrueParameterSource::Fixed { slip, guess } => (slip, guess),
        };
        slip.push(s);
        guess.push(g);
    }
    TrueParameters { slip, guess }
}

pub fn generate_class_priors(
    classes: LatentClasses,
    shape: &ClassPriorShape,
    rng: &mut Lcg,
) -> Vec<f64> {
    match *shape {
        ClassPriorShape::Uniform => classes.uniform(),
        ClassPriorShape::Bell {
            center,
            spread,
            noise,
        } => {
            let raw: Vec<f64> = classes
                .iter()
                .map(|c| {
                    let m = classes.mastered_count(c) as f64;
                    let w = (-0.5 * (m - center).powi(2) / spread).exp();
                    w * (1.0 - noise / 2.0 + noise * rng.next_f64())
                })
                .collect();
            let sum: f64 = raw.iter().sum();
            raw.into_iter().map(|v| v / sum).collect()
        }
    }
}

/// Synthetic responses with the true class of every respondent
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedData {
    pub responses: ResponseMatrix,
    pub true_classes: Vec<usize>,
}

/// Draw N respondents: class from `class_priors`, then one Bernoulli per item
pub fn simulate_responses(
    num_respondents: usize,
    q_matrix: &QMatrix,
    truth: &TrueParameters,
    class_priors: &[f64],
    rng: &mut Lcg,
) -> Result<SimulatedData> {
    let j_n = q_matrix.num_items();
    if truth.slip.len() != j_n || truth.guess.len() != j_n {
        return Err(CdmError::invalid(format!(
            "true parameters cover {} items, Q-matrix has {j_n}",
            truth.slip.len()
        )));
    }
    if class_priors.len() != 1usize << q_matrix.num_attributes() {
        return Err(CdmError::invalid("class priors do not match 2^K"));
    }

    let mut rows = Vec::with_capacity(num_respondents);
    let mut true_classes = Vec::with_capacity(num_respondents);
    for _ in 0..num_respondents {
        let class = rng.categorical(class_priors);
        let row: Vec<bool> = (0..j_n)
            .map(|j| {
                let p = if ideal_response_for_class(q_matrix.required(j), class) {
                    1.0 - truth.slip[j]
                } else {
                    truth.guess[j]
                };
                rng.bernoulli(p)
            })
            .collect();
        rows.push(row);
        true_classes.push(class);
    }

    Ok(SimulatedData {
        responses: ResponseMatrix::from_complete(j_n, rows)?,
        true_classes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_blueprint_shape() {
        let cfg = SimulationConfig::default();
        assert_eq!(cfg.num_items(), 100);
        let q = cfg.build_q_matrix().unwrap();
        assert_eq!(q.num_items(), 100);
        assert_eq!(q.item(0).id, "item_cli_01");
        assert_eq!(q.required(0), &[0, 1, 2]);
        assert_eq!(q.item(25).id, "item_cir_01");
        assert!(q.diagnostics().is_complete);
    }

    #[test]
    fn test_validate_rejects_out_of_range_attribute() {
        let cfg = SimulationConfig {
            num_attributes: 2,
            areas: vec![AreaBlueprint::new("x", 3, &[0, 2])],
            ..SimulationConfig::default()
        };
        assert!(cfg.validate().is_err());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_true_parameters_respect_rejection() {
        for sampler in [BetaSampler::Reference, BetaSampler::Cheng] {
            let mut rng = Lcg::new(42);
            let src = TrueParameterSource::Beta {
                a: 2.0,
                b: 8.0,
                max_sum: 0.95,
                sampler,
            };
            let t = generate_true_parameters(500, &src, &mut rng);
            for (s, g) in t.slip.iter().zip(&t.guess) {
                assert!(s + g < 0.95);
                assert!(*s > 0.0 && *g > 0.0);
            }
        }
    }

    #[test]
    fn test_default_source_matches_calibration_draws() {
        let cfg = SimulationConfig::default();
        let mut rng = Lcg::new(cfg.seed);
        let t = generate_true_parameters(3, &cfg.true_parameters, &mut rng);
        let slip = [0.11493813238105656, 0.1554295238036255, 0.24037095256663266];
        let guess = [0.23176370178629405, 0.18035693846778356, 0.0772789557142137];
        for j in 0..3 {
            assert!((t.slip[j] - slip[j]).abs() < 1e-12);
            assert!((t.guess[j] - guess[j]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sampler_defaults_when_absent_from_json() {
        let src: TrueParameterSource =
            serde_json::from_str(r#"{"kind":"beta","a":2.0,"b":8.0,"max_sum":0.95}"#).unwrap();
        assert_eq!(
            src,
            TrueParameterSource::Beta {
                a: 2.0,
                b: 8.0,
                max_sum: 0.95,
                sampler: BetaSampler::Reference,
            }
        );
    }

    #[test]
    fn test_bell_priors_normalized() {
        let mut rng = Lcg::new(42);
        let lc = LatentClasses::new(6).unwrap();
        let shape = SimulationConfig::default().class_priors;
        let priors = generate_class_priors(lc, &shape, &mut rng);
        assert_eq!(priors.len(), 64);
        assert!((priors.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        // 中间类别权重更大
        assert!(priors[0b000111] > priors[0]);
    }

    #[test]
    fn test_simulation_deterministic() {
        let cfg = SimulationConfig::default();
        let q = cfg.build_q_matrix().unwrap();
        let lc = LatentClasses::new(6).unwrap();

        let run = || {
            let mut rng = Lcg::new(42);
            let truth = generate_true_parameters(100, &cfg.true_parameters, &mut rng);
            let priors = generate_class_priors(lc, &cfg.class_priors, &mut rng);
            simulate_responses(500, &q, &truth, &priors, &mut rng).unwrap()
        };
        assert_eq!(run(), run());
    }
}
