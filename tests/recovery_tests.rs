//! Parameter recovery tests
//!
//! End-to-end runs of the simulation harness: generate data from known DINA
//! parameters, refit, and check recovery and reproducibility.

use danci_cdm::estimator::StopReason;
use danci_cdm::latent::LatentClasses;
use danci_cdm::simulation::{
    generate_class_priors, generate_true_parameters, simulate_responses, AreaBlueprint,
    ClassPriorShape, Lcg, TrueParameterSource,
};
use danci_cdm::{
    compare_models, run_recovery_study, EmOptions, ItemParameters, ModelType, SimulationConfig,
};

fn two_attribute_config(n: usize) -> SimulationConfig {
    SimulationConfig {
        num_attributes: 2,
        areas: vec![
            AreaBlueprint::new("first", 3, &[0]),
            AreaBlueprint::new("second", 3, &[1]),
        ],
        sample_sizes: vec![n],
        seed: 42,
        true_parameters: TrueParameterSource::Fixed {
            slip: 0.1,
            guess: 0.1,
        },
        class_priors: ClassPriorShape::Uniform,
        em: EmOptions::default(),
        fit_gdina: false,
    }
}

// ============================================================================
// End-to-end scenario
// ============================================================================

#[test]
fn two_attribute_six_item_recovery() {
    let report = run_recovery_study(&two_attribute_config(200)).unwrap();
    let result = report.result_for(200).unwrap();

    assert_eq!(report.metadata.num_items, 6);
    assert!(result.dina.converged, "stop = {:?}", result.dina.stop_reason);
    assert!(
        result.dina.slip_recovery.rmse < 0.05,
        "slip RMSE = {}",
        result.dina.slip_recovery.rmse
    );
    assert!(
        result.dina.guess_recovery.rmse < 0.05,
        "guess RMSE = {}",
        result.dina.guess_recovery.rmse
    );
    assert!(
        result.dina.pattern_recovery > 0.85,
        "pattern recovery = {}",
        result.dina.pattern_recovery
    );
    assert!(result.dina.attribute_accuracy >= result.dina.pattern_recovery);
    assert!(result.gdina.is_none());
    assert!(result.aic_winner.is_none());
}

// ============================================================================
// Reproducibility
// ============================================================================

#[test]
fn seed_reproduces_response_matrix_k6_j100_n500() {
    let cfg = SimulationConfig::default();
    let q = cfg.build_q_matrix().unwrap();
    let classes = LatentClasses::new(6).unwrap();

    let draw = || {
        let mut rng = Lcg::new(42);
        let truth = generate_true_parameters(q.num_items(), &cfg.true_parameters, &mut rng);
        let priors = generate_class_priors(classes, &cfg.class_priors, &mut rng);
        let data = simulate_responses(500, &q, &truth, &priors, &mut rng).unwrap();
        (truth, priors, data)
    };

    let (t1, p1, d1) = draw();
    let (t2, p2, d2) = draw();
    assert_eq!(q.num_items(), 100);
    assert_eq!(d1.responses.num_respondents(), 500);
    assert_eq!(t1, t2);
    assert_eq!(p1, p2);
    assert_eq!(d1, d2);
}

#[test]
fn seed_reproduces_recovery_statistics() {
    let cfg = SimulationConfig {
        sample_sizes: vec![80],
        fit_gdina: false,
        em: EmOptions {
            max_iterations: 60,
            ..EmOptions::default()
        },
        ..SimulationConfig::default()
    };
    let first = run_recovery_study(&cfg).unwrap();
    let second = run_recovery_study(&cfg).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());

    let other_seed = run_recovery_study(&SimulationConfig { seed: 7, ..cfg }).unwrap();
    assert_ne!(first.true_params, other_seed.true_params);
}

// ============================================================================
// Recovery improves with N
// ============================================================================

#[test]
fn slip_rmse_shrinks_with_sample_size() {
    let cfg = SimulationConfig {
        sample_sizes: vec![30, 500],
        fit_gdina: false,
        ..SimulationConfig::default()
    };
    let report = run_recovery_study(&cfg).unwrap();
    let small = report.result_for(30).unwrap();
    let large = report.result_for(500).unwrap();

    // small-sample noise allowance
    let tolerance = 0.02;
    assert!(
        large.dina.slip_recovery.rmse <= small.dina.slip_recovery.rmse + tolerance,
        "RMSE(slip) N=500 {} vs N=30 {}",
        large.dina.slip_recovery.rmse,
        small.dina.slip_recovery.rmse
    );
    assert!(large.dina.slip_recovery.r > small.dina.slip_recovery.r - tolerance);

    for r in &report.recovery_by_n {
        assert!(r.dina.log_likelihood_monotone, "N={}: LL decreased", r.n);
        assert_ne!(r.dina.stop_reason, StopReason::Diverged);
    }
}

// ============================================================================
// DINA vs G-DINA
// ============================================================================

#[test]
fn gdina_comparison_is_reported() {
    let cfg = SimulationConfig {
        sample_sizes: vec![100],
        fit_gdina: true,
        em: EmOptions {
            max_iterations: 100,
            ..EmOptions::default()
        },
        ..SimulationConfig::default()
    };
    let report = run_recovery_study(&cfg).unwrap();
    let result = &report.recovery_by_n[0];
    let gdina = result.gdina.as_ref().unwrap();

    // G-DINA has strictly more item parameters on this blueprint
    assert!(gdina.fit.num_parameters > result.dina.fit.num_parameters);
    let expected = if result.dina.fit.aic <= gdina.fit.aic {
        ModelType::Dina
    } else {
        ModelType::Gdina
    };
    assert_eq!(result.aic_winner, Some(expected));
}

#[test]
fn gdina_nests_dina_on_dina_data() {
    let cfg = two_attribute_config(200);
    let q = cfg.build_q_matrix().unwrap();
    let classes = LatentClasses::new(2).unwrap();
    let mut rng = Lcg::new(cfg.seed);
    let truth = generate_true_parameters(q.num_items(), &cfg.true_parameters, &mut rng);
    let priors = generate_class_priors(classes, &cfg.class_priors, &mut rng);
    let data = simulate_responses(200, &q, &truth, &priors, &mut rng).unwrap();

    let cmp = compare_models(&data.responses, &q, &EmOptions::default()).unwrap();
    assert!(
        cmp.gdina.final_log_likelihood >= cmp.dina.final_log_likelihood - 1e-2,
        "G-DINA LL {} below DINA LL {}",
        cmp.gdina.final_log_likelihood,
        cmp.dina.final_log_likelihood
    );

    let ItemParameters::Gdina(items) = &cmp.gdina.item_params else {
        panic!("expected G-DINA parameters");
    };
    for item in items {
        let p = &item.success_probabilities;
        assert_eq!(p.len(), 2);
        assert!(p[1] - p[0] > 0.5, "{} patterns not separated: {:?}", item.item_id, p);
    }
}
