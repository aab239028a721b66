use crate::types::EPSILON;

/// G-DINA 饱和模型设计矩阵 S (行优先, n = 2^r)
///
/// S[l][t] = 1 当且仅当项 t 的属性子集包含于约简模式 l (t ⊆ l)。
/// t ⊆ l 蕴含 t <= l，所以 S 是单位下三角矩阵。
pub fn design_matrix(num_required: usize) -> Vec<f64> {
    let n = 1usize << num_required;
    let mut s = vec![0.0; n * n];
    for l in 0..n {
        for t in 0..=l {
            if t & l == t {
                s[l * n + t] = 1.0;
            }
        }
    }
    s
}

/// 求解下三角系统 L * x = b (前向替换)
pub fn solve_triangular_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];

    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }

        let diag = l[i * n + i];
        if diag.abs() > EPSILON {
            x[i] = sum / diag;
        } else {
            x[i] = 0.0;
        }
    }

    x
}

/// 矩阵向量乘法 (行优先存储, x 不足 d 维时缺失项按 0 计)
pub fn mat_vec_mul(a: &[f64], x: &[f64], d: usize) -> Vec<f64> {
    if d == 0 {
        return Vec::new();
    }
    a.chunks(d)
        .take(d)
        .map(|row| dot_product(row, x))
        .collect()
}

/// 向量点积
pub fn dot_product(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// 向量加法: a += scale * b
pub fn vec_add_scaled(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, &bi) in a.iter_mut().zip(b.iter()) {
        *ai += scale * bi;
    }
}
