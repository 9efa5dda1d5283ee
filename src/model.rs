//! Simulation data types.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Number of agents choosing each product at each step.
///
/// Stored column by column, one column per step, since the simulation only ever
/// appends the column of the current step. Serialized as `n_prod` rows of
/// `n_steps` counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Vec<Vec<usize>>", try_from = "Vec<Vec<usize>>")]
pub struct AdoptionMatrix {
    n_prod: usize,
    col_vec: Vec<Vec<usize>>,
}

impl AdoptionMatrix {
    /// Create an empty matrix for `n_prod` products.
    pub fn new(n_prod: usize, n_steps: usize) -> Self {
        Self {
            n_prod,
            col_vec: Vec::with_capacity(n_steps),
        }
    }

    /// Append the counts of the next step.
    pub fn push_col(&mut self, col: Vec<usize>) -> Result<()> {
        let len = col.len();
        if len != self.n_prod {
            bail!("column length must be {}, but is {len}", self.n_prod);
        }
        self.col_vec.push(col);
        Ok(())
    }

    pub fn n_prod(&self) -> usize {
        self.n_prod
    }

    pub fn n_steps(&self) -> usize {
        self.col_vec.len()
    }

    pub fn get(&self, prod: usize, step: usize) -> usize {
        self.col_vec[step][prod]
    }

    pub fn col(&self, step: usize) -> &[usize] {
        &self.col_vec[step]
    }

    /// Get the matrix as `n_prod` rows of `n_steps` counts.
    pub fn rows(&self) -> Vec<Vec<usize>> {
        (0..self.n_prod)
            .map(|prod| (0..self.n_steps()).map(|step| self.get(prod, step)).collect())
            .collect()
    }

    /// Popularity of each product over the steps in `window`.
    pub fn window_weights(&self, window: Range<usize>) -> Vec<usize> {
        let mut weights = vec![0; self.n_prod];
        for step in window {
            for (weight, &count) in weights.iter_mut().zip(self.col(step)) {
                *weight += count;
            }
        }
        weights
    }

    /// Total adoption of each product over all steps.
    pub fn final_dist(&self) -> Vec<usize> {
        self.window_weights(0..self.n_steps())
    }
}

impl From<AdoptionMatrix> for Vec<Vec<usize>> {
    fn from(mat: AdoptionMatrix) -> Self {
        mat.rows()
    }
}

impl TryFrom<Vec<Vec<usize>>> for AdoptionMatrix {
    type Error = anyhow::Error;

    fn try_from(rows: Vec<Vec<usize>>) -> Result<Self> {
        let n_prod = rows.len();
        if n_prod == 0 {
            bail!("matrix must have at least one row");
        }
        let n_steps = rows[0].len();
        if rows.iter().any(|row| row.len() != n_steps) {
            bail!("matrix must have {n_steps} columns");
        }

        let mut mat = AdoptionMatrix::new(n_prod, n_steps);
        for step in 0..n_steps {
            mat.push_col(rows.iter().map(|row| row[step]).collect())?;
        }
        Ok(mat)
    }
}

/// Result of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// Full adoption matrix.
    Whole(AdoptionMatrix),
    /// Total adoption of each product.
    Final(Vec<usize>),
}

impl Outcome {
    pub fn new(mat: AdoptionMatrix, whole_dist: bool) -> Self {
        if whole_dist {
            Outcome::Whole(mat)
        } else {
            Outcome::Final(mat.final_dist())
        }
    }

    pub fn final_dist(&self) -> Vec<usize> {
        match self {
            Outcome::Whole(mat) => mat.final_dist(),
            Outcome::Final(dist) => dist.clone(),
        }
    }
}
