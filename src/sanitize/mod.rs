use crate::types::{EPSILON, LOG_PRIOR_FLOOR, PROB_FLOOR};

/// 检查数组是否包含无效值 (NaN 或 Inf)
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

/// 截断概率，保证 ln(p) 与 ln(1-p) 有限
#[inline]
pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(PROB_FLOOR, 1.0 - PROB_FLOOR)
}

/// 先验概率取对数（下限保护）
#[inline]
pub fn safe_ln_prior(p: f64) -> f64 {
    p.max(LOG_PRIOR_FLOOR).ln()
}

/// 数值稳定的 log-sum-exp: ln(Σ exp(x_i))
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// 归一化分布；总和无效时退回均匀分布
///
/// 返回 false 表示发生了回退
pub fn normalize_distribution(p: &mut [f64]) -> bool {
    if p.is_empty() {
        return true;
    }
    for v in p.iter_mut() {
        if v.is_nan() || *v < 0.0 {
            *v = 0.0;
        }
    }
    let sum: f64 = p.iter().sum();
    if sum > EPSILON && sum.is_finite() {
        for v in p.iter_mut() {
            *v /= sum;
        }
        true
    } else {
        let u = 1.0 / p.len() as f64;
        p.iter_mut().for_each(|v| *v = u);
        false
    }
}

/// 下限截断后重新归一化（防止类别先验退化为 0）
pub fn floor_and_normalize(p: &mut [f64], floor: f64) {
    for v in p.iter_mut() {
        if v.is_nan() || *v < floor {
            *v = floor;
        }
    }
    normalize_distribution(p);
}

/// 检查是否为合法概率分布
pub fn is_distribution(p: &[f64], tolerance: f64) -> bool {
    !p.is_empty()
        && !has_invalid_values(p)
        && p.iter().all(|&v| v >= 0.0)
        && (p.iter().sum::<f64>() - 1.0).abs() <= tolerance
}
