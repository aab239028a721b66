//! DINA (Deterministic-Input, Noisy-AND) item model
//!
//! Ideal response: eta = AND over required attributes of alpha_k. An item with
//! an all-zero Q row requires nothing, so eta = 1 for every class (trivial
//! mastery).
//!
//! P(correct | eta) = 1 - slip if eta, else guess.

use serde::{Deserialize, Serialize};

use crate::latent::has_attribute;
use crate::types::{DEFAULT_GUESS, DEFAULT_SLIP};

/// Per-item DINA parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DinaItem {
    pub item_id: String,
    /// P(incorrect | all required attributes mastered)
    pub slip: f64,
    /// P(correct | some required attribute missing)
    pub guess: f64,
    /// 0-based attribute indices with q_jk = 1
    pub required_attributes: Vec<usize>,
    /// True when no responses were available and defaults were kept
    #[serde(default)]
    pub defaulted: bool,
}

impl DinaItem {
    pub fn new(item_id: impl Into<String>, slip: f64, guess: f64, required: Vec<usize>) -> Self {
        Self {
            item_id: item_id.into(),
            slip,
            guess,
            required_attributes: required,
            defaulted: false,
        }
    }

    /// Item with the default slip/guess
    pub fn with_defaults(item_id: impl Into<String>, required: Vec<usize>) -> Self {
        Self::new(item_id, DEFAULT_SLIP, DEFAULT_GUESS, required)
    }

    /// eta for latent class c
    pub fn eta(&self, class: usize) -> bool {
        ideal_response_for_class(&self.required_attributes, class)
    }

    pub fn p_correct_for_class(&self, class: usize) -> f64 {
        p_correct(self.slip, self.guess, self.eta(class))
    }

    /// 1 - slip > guess
    pub fn is_monotone(&self) -> bool {
        1.0 - self.slip > self.guess
    }
}

/// eta from an explicit Q row and mastery pattern
pub fn ideal_response(q_row: &[bool], alpha: &[bool]) -> bool {
    q_row.iter().zip(alpha.iter()).all(|(&q, &a)| !q || a)
}

/// eta from required-attribute indices and a class index
#[inline]
pub fn ideal_response_for_class(required: &[usize], class: usize) -> bool {
    required.iter().all(|&k| has_attribute(class, k))
}

#[inline]
pub fn p_correct(slip: f64, guess: f64, eta: bool) -> f64 {
    if eta {
        1.0 - slip
    } else {
        guess
    }
}

/// Bounds applied to slip/guess after each M-step
#[derive(Clone, Copy, Debug)]
pub struct DinaBounds {
    pub min_param: f64,
    pub max_param: f64,
    /// slip + guess <= 1 - margin
    pub monotonicity_margin: f64,
}

/// Clamp slip/guess into [min, max] and enforce slip + guess <= 1 - margin.
///
/// The excess is removed symmetrically; if one parameter reaches `min_param`
/// the remainder is taken from the other.
pub fn constrain(slip: f64, guess: f64, bounds: DinaBounds) -> (f64, f64) {
    let DinaBounds {
        min_param,
        max_param,
        monotonicity_margin,
    } = bounds;
    let mut s = slip.clamp(min_param, max_param);
    let mut g = guess.clamp(min_param, max_param);

    let limit = 1.0 - monotonicity_margin;
    let excess = s + g - limit;
    if excess > 0.0 {
        s -= excess / 2.0;
        g -= excess / 2.0;
        if s < min_param {
            g -= min_param - s;
            s = min_param;
        }
        if g < min_param {
            s -= min_param - g;
            g = min_param;
        }
    }
    (s, g)
}
