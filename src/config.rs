//! Harness settings read from the environment

use std::path::PathBuf;
use std::time::Duration;

use crate::estimator::EmOptions;
use crate::simulation::SimulationConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. "info" or "danci_cdm=debug"
    pub level: String,
    /// Daily rolling log files go here when set
    pub file_dir: Option<PathBuf>,
}

/// Settings of the recovery harness binary
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessSettings {
    pub seed: u32,
    pub sample_sizes: Vec<usize>,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub time_budget: Option<Duration>,
    pub fit_gdina: bool,
    pub parallel: bool,
    pub output_dir: PathBuf,
    pub log: LogSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        let em = EmOptions::default();
        Self {
            seed: sim.seed,
            sample_sizes: sim.sample_sizes,
            max_iterations: em.max_iterations,
            tolerance: em.tolerance,
            time_budget: None,
            fit_gdina: sim.fit_gdina,
            parallel: false,
            output_dir: PathBuf::from("tmp"),
            log: LogSettings {
                level: "info".to_string(),
                file_dir: None,
            },
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_sizes(value: &str) -> Option<Vec<usize>> {
    let sizes: Option<Vec<usize>> = value
        .split(',')
        .map(|s| s.trim().parse::<usize>().ok().filter(|&n| n > 0))
        .collect();
    sizes.filter(|v| !v.is_empty())
}

impl HarnessSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; missing or unparsable values keep
    /// their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let seed = lookup("CDM_SEED")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(defaults.seed);

        let sample_sizes = lookup("CDM_SAMPLE_SIZES")
            .and_then(|v| parse_sizes(&v))
            .unwrap_or(defaults.sample_sizes);

        let max_iterations = lookup("CDM_MAX_ITERATIONS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.max_iterations);

        let tolerance = lookup("CDM_TOLERANCE")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(defaults.tolerance);

        let time_budget = lookup("CDM_TIME_BUDGET_SECS")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64);

        let fit_gdina = lookup("CDM_FIT_GDINA")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.fit_gdina);

        let parallel = lookup("CDM_PARALLEL")
            .and_then(|v| parse_flag(&v))
            .unwrap_or(defaults.parallel);

        let output_dir = lookup("CDM_OUTPUT_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let level = lookup("RUST_LOG").unwrap_or(defaults.log.level);
        let file_dir = lookup("ENABLE_FILE_LOGS")
            .and_then(|v| parse_flag(&v))
            .filter(|&on| on)
            .map(|_| PathBuf::from(lookup("LOG_DIR").unwrap_or_else(|| "./logs".to_string())));

        Self {
            seed,
            sample_sizes,
            max_iterations,
            tolerance,
            time_budget,
            fit_gdina,
            parallel,
            output_dir,
            log: LogSettings { level, file_dir },
        }
    }

    /// Default study with these overrides applied
    pub fn simulation_config(&self) -> SimulationConfig {
        SimulationConfig {
            seed: self.seed,
            sample_sizes: self.sample_sizes.clone(),
            fit_gdina: self.fit_gdina,
            em: EmOptions {
                max_iterations: self.max_iterations,
                tolerance: self.tolerance,
                time_budget: self.time_budget,
                parallel: self.parallel,
                ..EmOptions::default()
            },
            ..SimulationConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let settings = HarnessSettings::from_lookup(|_| None);
        assert_eq!(settings, HarnessSettings::default());
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.sample_sizes, vec![30, 50, 100, 200, 500]);
    }

    #[test]
    fn test_overrides() {
        let settings = HarnessSettings::from_lookup(lookup_from(&[
            ("CDM_SEED", "7"),
            ("CDM_SAMPLE_SIZES", "40, 80"),
            ("CDM_MAX_ITERATIONS", "50"),
            ("CDM_TOLERANCE", "1e-3"),
            ("CDM_TIME_BUDGET_SECS", "2.5"),
            ("CDM_FIT_GDINA", "false"),
            ("CDM_OUTPUT_DIR", "/tmp/out"),
            ("RUST_LOG", "debug"),
            ("ENABLE_FILE_LOGS", "1"),
        ]));
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.sample_sizes, vec![40, 80]);
        assert_eq!(settings.max_iterations, 50);
        assert_eq!(settings.tolerance, 1e-3);
        assert_eq!(settings.time_budget, Some(Duration::from_millis(2500)));
        assert!(!settings.fit_gdina);
        assert_eq!(settings.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(settings.log.level, "debug");
        assert_eq!(settings.log.file_dir, Some(PathBuf::from("./logs")));

        let sim = settings.simulation_config();
        assert_eq!(sim.seed, 7);
        assert_eq!(sim.em.max_iterations, 50);
        assert!(!sim.fit_gdina);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let settings = HarnessSettings::from_lookup(lookup_from(&[
            ("CDM_SEED", "forty-two"),
            ("CDM_SAMPLE_SIZES", "30,abc"),
            ("CDM_TOLERANCE", "-1"),
            ("CDM_FIT_GDINA", "maybe"),
        ]));
        let defaults = HarnessSettings::default();
        assert_eq!(settings.seed, defaults.seed);
        assert_eq!(settings.sample_sizes, defaults.sample_sizes);
        assert_eq!(settings.tolerance, defaults.tolerance);
        assert_eq!(settings.fit_gdina, defaults.fit_gdina);
    }
}
