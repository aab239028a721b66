//! E-step: posterior class membership and expected counts
//!
//! Respondents are split into chunks of a size that depends only on N. Each
//! chunk produces a partial accumulator and the partials are merged in chunk
//! order, so the parallel and sequential paths produce identical sums.

use rayon::prelude::*;

use crate::matrix::vec_add_scaled;
use crate::model::ProbabilityTable;
use crate::types::{observed, ResponseMatrix};

const MIN_CHUNK: usize = 64;
const MAX_CHUNKS: usize = 64;

/// Expected-count accumulators for one E-step
#[derive(Clone, Debug)]
pub struct ExpectedCounts {
    num_classes: usize,
    /// J x C: expected number of respondents in class c who answered item j
    pub attempts: Vec<f64>,
    /// J x C: expected number of those who answered correctly
    pub correct: Vec<f64>,
    /// Σ_i posterior_i(c)
    pub class_mass: Vec<f64>,
    /// Marginal log-likelihood of the parameters the E-step ran on
    pub log_likelihood: f64,
}

impl ExpectedCounts {
    fn zeros(num_items: usize, num_classes: usize) -> Self {
        Self {
            num_classes,
            attempts: vec![0.0; num_items * num_classes],
            correct: vec![0.0; num_items * num_classes],
            class_mass: vec![0.0; num_classes],
            log_likelihood: 0.0,
        }
    }

    fn merge(&mut self, other: &Self) {
        vec_add_scaled(&mut self.attempts, &other.attempts, 1.0);
        vec_add_scaled(&mut self.correct, &other.correct, 1.0);
        vec_add_scaled(&mut self.class_mass, &other.class_mass, 1.0);
        self.log_likelihood += other.log_likelihood;
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn attempts_row(&self, j: usize) -> &[f64] {
        let c = self.num_classes;
        &self.attempts[j * c..(j + 1) * c]
    }

    pub fn correct_row(&self, j: usize) -> &[f64] {
        let c = self.num_classes;
        &self.correct[j * c..(j + 1) * c]
    }
}

fn chunk_size(num_respondents: usize) -> usize {
    MIN_CHUNK.max(num_respondents.div_ceil(MAX_CHUNKS))
}

fn accumulate(
    rows: &[Vec<Option<bool>>],
    table: &ProbabilityTable,
    log_priors: &[f64],
) -> ExpectedCounts {
    let c_n = table.num_classes();
    let mut acc = ExpectedCounts::zeros(table.num_items(), c_n);
    let mut post = vec![0.0; c_n];

    for row in rows {
        acc.log_likelihood += table.posterior_into(log_priors, observed(row), &mut post);
        vec_add_scaled(&mut acc.class_mass, &post, 1.0);
        for (j, x) in observed(row) {
            let range = j * c_n..(j + 1) * c_n;
            vec_add_scaled(&mut acc.attempts[range.clone()], &post, 1.0);
            if x {
                vec_add_scaled(&mut acc.correct[range], &post, 1.0);
            }
        }
    }
    acc
}

/// Run the E-step over every respondent
pub fn e_step(
    responses: &ResponseMatrix,
    table: &ProbabilityTable,
    log_priors: &[f64],
    parallel: bool,
) -> ExpectedCounts {
    let rows = responses.rows();
    let size = chunk_size(rows.len());

    let partials: Vec<ExpectedCounts> = if parallel {
        rows.par_chunks(size)
            .map(|chunk| accumulate(chunk, table, log_priors))
            .collect()
    } else {
        rows.chunks(size)
            .map(|chunk| accumulate(chunk, table, log_priors))
            .collect()
    };

    let mut total = ExpectedCounts::zeros(table.num_items(), table.num_classes());
    for partial in &partials {
        total.merge(partial);
    }
    total
}
