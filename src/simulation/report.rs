//! Recovery report and its artifacts

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::estimator::StopReason;
use crate::fit::FitIndices;
use crate::simulation::recovery::RecoveryStats;
use crate::simulation::AreaBlueprint;
use crate::types::ModelType;

pub const TSV_FILE_NAME: &str = "cdm_recovery_table.tsv";
pub const JSON_FILE_NAME: &str = "cdm_calibration_results.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub num_attributes: usize,
    pub num_items: usize,
    pub seed: u32,
    pub sample_sizes: Vec<usize>,
    pub qmatrix_source: String,
    pub areas: Vec<AreaBlueprint>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrueValues {
    pub slip: Vec<f64>,
    pub guess: Vec<f64>,
    pub class_priors: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DinaRecovery {
    pub slip_recovery: RecoveryStats,
    pub guess_recovery: RecoveryStats,
    pub iterations: usize,
    pub converged: bool,
    pub stop_reason: StopReason,
    pub log_likelihood: f64,
    /// No iteration lowered the log-likelihood by more than the tolerance
    pub log_likelihood_monotone: bool,
    pub fit: FitIndices,
    pub pattern_recovery: f64,
    pub attribute_accuracy: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GdinaSummary {
    pub iterations: usize,
    pub converged: bool,
    pub fit: FitIndices,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleSizeResult {
    pub n: usize,
    pub dina: DinaRecovery,
    pub gdina: Option<GdinaSummary>,
    /// Lower AIC; DINA wins ties
    pub aic_winner: Option<ModelType>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub metadata: ReportMetadata,
    pub true_params: TrueValues,
    pub recovery_by_n: Vec<SampleSizeResult>,
}

type Cell = fn(&SampleSizeResult) -> String;

fn pct(x: f64) -> String {
    format!("{:.1}%", x * 100.0)
}

fn gdina_cell(r: &SampleSizeResult, f: impl Fn(&GdinaSummary) -> String) -> String {
    r.gdina.as_ref().map(f).unwrap_or_else(|| "-".to_string())
}

const RECOVERY_ROWS: [(&str, Cell); 10] = [
    ("Slip RMSE", |r| format!("{:.3}", r.dina.slip_recovery.rmse)),
    ("Slip Bias", |r| format!("{:.3}", r.dina.slip_recovery.bias)),
    ("Slip r", |r| format!("{:.3}", r.dina.slip_recovery.r)),
    ("Guess RMSE", |r| format!("{:.3}", r.dina.guess_recovery.rmse)),
    ("Guess Bias", |r| format!("{:.3}", r.dina.guess_recovery.bias)),
    ("Guess r", |r| format!("{:.3}", r.dina.guess_recovery.r)),
    ("EM iterations", |r| r.dina.iterations.to_string()),
    ("Converged", |r| (if r.dina.converged { "yes" } else { "no" }).to_string()),
    ("Pattern recovery", |r| pct(r.dina.pattern_recovery)),
    ("Attr accuracy", |r| pct(r.dina.attribute_accuracy)),
];

const FIT_ROWS: [(&str, Cell); 8] = [
    ("DINA AIC", |r| format!("{:.0}", r.dina.fit.aic)),
    ("DINA BIC", |r| format!("{:.0}", r.dina.fit.bic)),
    ("DINA RMSEA", |r| format!("{:.4}", r.dina.fit.rmsea)),
    ("DINA G2", |r| format!("{:.1}", r.dina.fit.g_squared)),
    ("G-DINA AIC", |r| gdina_cell(r, |g| format!("{:.0}", g.fit.aic))),
    ("G-DINA BIC", |r| gdina_cell(r, |g| format!("{:.0}", g.fit.bic))),
    ("G-DINA RMSEA", |r| gdina_cell(r, |g| format!("{:.4}", g.fit.rmsea))),
    ("AIC wins", |r| match r.aic_winner {
        Some(ModelType::Dina) => "DINA".to_string(),
        Some(ModelType::Gdina) => "G-DINA".to_string(),
        None => "-".to_string(),
    }),
];

impl RecoveryReport {
    /// Tab-separated recovery and fit tables, one column per sample size
    pub fn to_tsv(&self) -> String {
        let mut lines = Vec::with_capacity(RECOVERY_ROWS.len() + FIT_ROWS.len() + 2);

        let mut header = vec!["Metric".to_string()];
        header.extend(self.recovery_by_n.iter().map(|r| format!("N={}", r.n)));
        lines.push(header.join("\t"));

        let render = |(label, cell): &(&str, Cell)| {
            let mut row = vec![label.to_string()];
            row.extend(self.recovery_by_n.iter().map(cell));
            row.join("\t")
        };

        lines.extend(RECOVERY_ROWS.iter().map(render));
        lines.push(String::new());
        lines.extend(FIT_ROWS.iter().map(render));
        lines.join("\n")
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn result_for(&self, n: usize) -> Option<&SampleSizeResult> {
        self.recovery_by_n.iter().find(|r| r.n == n)
    }

    /// Write the TSV table and the JSON results into `dir` (created if
    /// missing); returns (tsv path, json path)
    pub fn write_artifacts(&self, dir: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let tsv_path = dir.join(TSV_FILE_NAME);
        let json_path = dir.join(JSON_FILE_NAME);
        fs::write(&tsv_path, self.to_tsv())?;
        fs::write(&json_path, self.to_json()?)?;

        info!(
            tsv = %tsv_path.display(),
            json = %json_path.display(),
            "recovery artifacts written"
        );
        Ok((tsv_path, json_path))
    }
}
