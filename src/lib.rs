//! # danci-cdm - 认知诊断模型 (CDM) 估计引擎
//!
//! 本 crate 提供纯 Rust 实现的认知诊断算法:
//!
//! - **DINA / G-DINA** - 合取型与饱和型认知诊断模型
//! - **EM Estimation** - 对数空间 E 步 + 闭式 M 步的参数估计
//! - **Classification** - 潜在类别后验、MAP / EAP、后验熵
//! - **CDM-CAT** - 基于期望熵减的自适应选题
//! - **Recovery Study** - 参数恢复模拟与报告
//!
//! ## 模块结构
//!
//! - [`qmatrix`] - Q 矩阵 (题目-属性设计矩阵、可辨识性诊断)
//! - [`latent`] - 潜在类别枚举 (位编码)
//! - [`model`] - DINA / G-DINA 似然与概率表
//! - [`estimator`] - EM 估计 (并行 E 步、随机重启、模型比较)
//! - [`fit`] - 拟合指标 (AIC、BIC、G²、RMSEA、SRMR)
//! - [`classify`] - 学生分类
//! - [`cat`] - CDM-CAT 选题与会话
//! - [`simulation`] - 参数恢复模拟
//! - [`matrix`] - 矩阵运算
//! - [`sanitize`] - 数值稳定性
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use danci_cdm::{estimate, EmOptions, QMatrix, ResponseMatrix};
//!
//! let q = QMatrix::new(
//!     2,
//!     vec![
//!         ("a".into(), vec![1, 0]),
//!         ("b".into(), vec![0, 1]),
//!         ("c".into(), vec![1, 1]),
//!     ],
//! )
//! .unwrap();
//! let responses = ResponseMatrix::from_complete(
//!     3,
//!     vec![vec![true, false, false], vec![true, true, true], vec![false, false, false]],
//! )
//! .unwrap();
//! let fitted = estimate(&responses, &q, &EmOptions::default()).unwrap();
//! assert_eq!(fitted.class_priors.len(), 4);
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod error;
pub mod matrix;
pub mod sanitize;
pub mod types;
pub mod latent;
pub mod qmatrix;
pub mod model;
pub mod estimator;
pub mod fit;
pub mod classify;
pub mod cat;
pub mod simulation;
pub mod config;
pub mod logging;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

pub use error::{CdmError, Result};

pub use latent::{enumerate_latent_classes, LatentClasses};

pub use qmatrix::{QMatrix, QMatrixDiagnostics};

pub use model::{DinaItem, GdinaItem, ItemParameters};

/// 重新导出 EM 估计
pub use estimator::{compare_models, estimate, EmOptions, FittedModel, ModelComparison, StopReason};

pub use fit::FitIndices;

/// 重新导出学生分类
pub use classify::{
    classify, classify_matrix, classify_with_minimum, posterior_for, update_posterior,
    ClassificationProfile,
};

/// 重新导出 CDM-CAT
pub use cat::{
    score_candidates, select_next_item, select_next_item_with, CandidateScore, CatConfig,
    CatSession, CatStopReason, NextItem, SelectionMethod,
};

/// 重新导出模拟研究
pub use simulation::{
    run_recovery_study, simulate_responses, RecoveryReport, SimulationConfig,
};
