use std::process::ExitCode;

use danci_cdm::config::HarnessSettings;
use danci_cdm::logging::init_tracing;
use danci_cdm::run_recovery_study;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let settings = HarnessSettings::from_env();
    let _log_guard = init_tracing(&settings.log);

    let config = settings.simulation_config();
    tracing::info!(
        seed = config.seed,
        sample_sizes = ?config.sample_sizes,
        fit_gdina = config.fit_gdina,
        output_dir = %settings.output_dir.display(),
        "cdm recovery study"
    );

    let report = match run_recovery_study(&config) {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "recovery study failed");
            return ExitCode::FAILURE;
        }
    };

    println!("{}", report.to_tsv());

    match report.write_artifacts(&settings.output_dir) {
        Ok((tsv, json)) => {
            tracing::info!(tsv = %tsv.display(), json = %json.display(), "done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to write artifacts");
            ExitCode::FAILURE
        }
    }
}
