//! Model fit diagnostics
//!
//! G2 is a limited-information statistic over univariate and bivariate item
//! margins. Every margin only uses respondents who answered the items
//! involved, and the same computation is applied to DINA and G-DINA, so the
//! two models stay comparable.

use serde::{Deserialize, Serialize};

use crate::model::ItemParameters;
use crate::types::{observed, ResponseMatrix, EPSILON};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitIndices {
    pub log_likelihood: f64,
    /// Item parameters plus 2^K - 1 free class priors
    pub num_parameters: usize,
    /// Number of respondents
    pub num_observations: usize,
    pub aic: f64,
    pub bic: f64,
    pub g_squared: f64,
    pub df: usize,
    pub rmsea: f64,
    pub srmr: f64,
    /// Upper-tail chi-square(df) probability of G2
    pub p_value: f64,
}

/// Observed margins of a response matrix
struct ObservedMargins {
    num_items: usize,
    /// answered[j], correct[j]
    answered: Vec<f64>,
    correct: Vec<f64>,
    /// Upper triangle, row-major J x J: both answered / both correct
    pair_answered: Vec<f64>,
    pair_correct: Vec<f64>,
    /// j answered correctly among respondents who answered j and k
    pair_first_correct: Vec<f64>,
    pair_second_correct: Vec<f64>,
}

impl ObservedMargins {
    fn collect(responses: &ResponseMatrix) -> Self {
        let j_n = responses.num_items();
        let mut m = Self {
            num_items: j_n,
            answered: vec![0.0; j_n],
            correct: vec![0.0; j_n],
            pair_answered: vec![0.0; j_n * j_n],
            pair_correct: vec![0.0; j_n * j_n],
            pair_first_correct: vec![0.0; j_n * j_n],
            pair_second_correct: vec![0.0; j_n * j_n],
        };

        let mut obs: Vec<(usize, bool)> = Vec::with_capacity(j_n);
        for row in responses.rows() {
            obs.clear();
            obs.extend(observed(row));
            for (a, &(j, xj)) in obs.iter().enumerate() {
                m.answered[j] += 1.0;
                if xj {
                    m.correct[j] += 1.0;
                }
                for &(k, xk) in &obs[a + 1..] {
                    let idx = j * j_n + k;
                    m.pair_answered[idx] += 1.0;
                    if xj {
                        m.pair_first_correct[idx] += 1.0;
                    }
                    if xk {
                        m.pair_second_correct[idx] += 1.0;
                    }
                    if xj && xk {
                        m.pair_correct[idx] += 1.0;
                    }
                }
            }
        }
        m
    }
}

/// Model-implied P(x_j = 1) and P(x_j = 1, x_k = 1)
struct ImpliedMargins {
    num_items: usize,
    single: Vec<f64>,
    pair: Vec<f64>,
}

impl ImpliedMargins {
    fn compute(params: &ItemParameters, priors: &[f64]) -> Self {
        let j_n = params.len();
        let c_n = priors.len();

        // weighted[j][c] = π_c P_j(c)
        let mut probs = vec![0.0; j_n * c_n];
        for j in 0..j_n {
            for c in 0..c_n {
                probs[j * c_n + c] = params.p_correct(j, c);
            }
        }

        let single = (0..j_n)
            .map(|j| {
                probs[j * c_n..(j + 1) * c_n]
                    .iter()
                    .zip(priors)
                    .map(|(p, w)| p * w)
                    .sum()
            })
            .collect();

        let mut pair = vec![0.0; j_n * j_n];
        for j in 0..j_n {
            let pj = &probs[j * c_n..(j + 1) * c_n];
            for k in (j + 1)..j_n {
                let pk = &probs[k * c_n..(k + 1) * c_n];
                pair[j * j_n + k] = priors
                    .iter()
                    .zip(pj.iter().zip(pk))
                    .map(|(w, (a, b))| w * a * b)
                    .sum();
            }
        }

        Self {
            num_items: j_n,
            single,
            pair,
        }
    }
}

/// Fit indices for fitted parameters and priors.
///
/// `log_likelihood` is the marginal log-likelihood of exactly these
/// parameters.
pub fn compute_fit(
    responses: &ResponseMatrix,
    params: &ItemParameters,
    priors: &[f64],
    log_likelihood: f64,
) -> FitIndices {
    let n = responses.num_respondents();
    let j_n = params.len();
    let num_parameters = params.num_parameters() + priors.len().saturating_sub(1);

    let aic = -2.0 * log_likelihood + 2.0 * num_parameters as f64;
    let bic = -2.0 * log_likelihood + num_parameters as f64 * (n.max(1) as f64).ln();

    let observed = ObservedMargins::collect(responses);
    let implied = ImpliedMargins::compute(params, priors);

    let g_squared = limited_information_g2(&observed, &implied);
    let moments = j_n + j_n * j_n.saturating_sub(1) / 2;
    let df = moments.saturating_sub(num_parameters).max(1);

    let rmsea = if n > 0 {
        ((g_squared - df as f64) / (n as f64 * df as f64)).max(0.0).sqrt()
    } else {
        0.0
    };

    FitIndices {
        log_likelihood,
        num_parameters,
        num_observations: n,
        aic,
        bic,
        g_squared,
        df,
        rmsea,
        srmr: srmr(&observed, &implied),
        p_value: chi_square_p_value(g_squared, df as f64),
    }
}

/// 2 Σ O ln(O / E) over one margin's cells; 0 ln 0 = 0
fn g2_term(observed: f64, expected: f64) -> f64 {
    if observed <= 0.0 {
        0.0
    } else {
        2.0 * observed * (observed / expected.max(EPSILON)).ln()
    }
}

fn limited_information_g2(obs: &ObservedMargins, imp: &ImpliedMargins) -> f64 {
    let j_n = obs.num_items;
    let mut g2 = 0.0;

    for j in 0..j_n {
        let n = obs.answered[j];
        if n <= 0.0 {
            continue;
        }
        let p = imp.single[j];
        g2 += g2_term(obs.correct[j], n * p);
        g2 += g2_term(n - obs.correct[j], n * (1.0 - p));
    }

    for j in 0..j_n {
        for k in (j + 1)..j_n {
            let idx = j * j_n + k;
            let n = obs.pair_answered[idx];
            if n <= 0.0 {
                continue;
            }
            let p11 = imp.pair[idx];
            let p10 = imp.single[j] - p11;
            let p01 = imp.single[k] - p11;
            let p00 = 1.0 - p11 - p10 - p01;

            let o11 = obs.pair_correct[idx];
            let o10 = obs.pair_first_correct[idx] - o11;
            let o01 = obs.pair_second_correct[idx] - o11;
            let o00 = n - o11 - o10 - o01;

            g2 += g2_term(o11, n * p11)
                + g2_term(o10, n * p10)
                + g2_term(o01, n * p01)
                + g2_term(o00, n * p00);
        }
    }

    g2.max(0.0)
}

/// Phi correlation from a 2x2 table given as proportions
fn phi(p11: f64, pj: f64, pk: f64) -> Option<f64> {
    let denom = (pj * (1.0 - pj) * pk * (1.0 - pk)).sqrt();
    (denom > EPSILON).then(|| (p11 - pj * pk) / denom)
}

/// Root mean squared residual between observed and implied item-pair correlations
fn srmr(obs: &ObservedMargins, imp: &ImpliedMargins) -> f64 {
    let j_n = obs.num_items;
    debug_assert_eq!(j_n, imp.num_items);

    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for j in 0..j_n {
        for k in (j + 1)..j_n {
            let idx = j * j_n + k;
            let n = obs.pair_answered[idx];
            if n <= 0.0 {
                continue;
            }
            let observed_r = phi(
                obs.pair_correct[idx] / n,
                obs.pair_first_correct[idx] / n,
                obs.pair_second_correct[idx] / n,
            );
            let implied_r = phi(imp.pair[idx], imp.single[j], imp.single[k]);
            if let (Some(o), Some(e)) = (observed_r, implied_r) {
                sum_sq += (o - e).powi(2);
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        (sum_sq / count as f64).sqrt()
    }
}

// ==================== Chi-square tail ====================

/// Upper-tail chi-square probability Q(df/2, x/2)
pub fn chi_square_p_value(x: f64, df: f64) -> f64 {
    if x.is_nan() || x <= 0.0 || df <= 0.0 {
        return 1.0;
    }
    (1.0 - regularized_gamma_p(df / 2.0, x / 2.0)).clamp(0.0, 1.0)
}

const GAMMA_MAX_ITER: usize = 300;
const GAMMA_EPS: f64 = 1e-12;
const GAMMA_FPMIN: f64 = 1e-300;

/// Regularized lower incomplete gamma P(a, x)
fn regularized_gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let log_prefix = -x + a * x.ln() - ln_gamma(a);

    if x < a + 1.0 {
        // 级数展开
        let mut term = 1.0 / a;
        let mut sum = term;
        for n in 1..GAMMA_MAX_ITER {
            term *= x / (a + n as f64);
            sum += term;
            if term.abs() < GAMMA_EPS * sum.abs() {
                break;
            }
        }
        sum * log_prefix.exp()
    } else {
        // 连分式 (Lentz)
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / GAMMA_FPMIN;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=GAMMA_MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < GAMMA_FPMIN {
                d = GAMMA_FPMIN;
            }
            c = b + an / c;
            if c.abs() < GAMMA_FPMIN {
                c = GAMMA_FPMIN;
            }
            d = 1.0 / d;
            let del = d * c;
            h *= del;
            if (del - 1.0).abs() < GAMMA_EPS {
                break;
            }
        }
        1.0 - log_prefix.exp() * h
    }
}

/// Lanczos approximation of ln Γ(x), x > 0
fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COEF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}
