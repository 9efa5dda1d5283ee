//! Innovation policies.

use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

/// Rule used to place the agents that innovate at a given step.
pub trait InnovationAllocator {
    /// Number of products open to the first cohort.
    fn n_prod_init(&self) -> usize;

    /// Update the innovation pool from the current window weights.
    ///
    /// Returns `false` if no innovator can be placed at this step.
    fn prepare(&mut self, weights: &[usize]) -> bool;

    /// Distribute `n_inn` innovators over the products.
    fn allocate<R: Rng + ?Sized>(&mut self, n_inn: usize, rng: &mut R) -> Result<Vec<usize>>;
}

/// Innovation policy selected in the configuration.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Innovators unlock new products, then choose among all of them.
    Random,
    /// Innovators revive products absent from the memory window.
    Revive,
}

/// Innovators open products that were never available before.
///
/// Starts with `n_prod_active` products and unlocks one product per innovator
/// until all `n_prod` products are active. From then on innovators choose
/// uniformly among all products.
#[derive(Debug)]
pub struct RandomInnovation {
    n_prod: usize,
    n_prod_active: usize,
}

impl RandomInnovation {
    pub fn new(n_prod: usize, n_prod_init: usize) -> Result<Self> {
        if n_prod_init == 0 || n_prod_init > n_prod {
            bail!("initial number of products must be in the range 1..={n_prod}, but is {n_prod_init}");
        }
        Ok(Self {
            n_prod,
            n_prod_active: n_prod_init,
        })
    }

    /// Get the number of products unlocked so far.
    pub fn n_prod_active(&self) -> usize {
        self.n_prod_active
    }
}

impl InnovationAllocator for RandomInnovation {
    fn n_prod_init(&self) -> usize {
        self.n_prod_active
    }

    fn prepare(&mut self, _weights: &[usize]) -> bool {
        self.n_prod > 0
    }

    fn allocate<R: Rng + ?Sized>(&mut self, n_inn: usize, rng: &mut R) -> Result<Vec<usize>> {
        let mut counts = vec![0; self.n_prod];

        // Innovators left over once every product is unlocked.
        let n_free = if self.n_prod_active == self.n_prod {
            n_inn
        } else {
            let n_new = n_inn.min(self.n_prod - self.n_prod_active);
            for count in &mut counts[self.n_prod_active..self.n_prod_active + n_new] {
                *count = 1;
            }
            self.n_prod_active += n_new;
            log::debug!("{} of {} products unlocked", self.n_prod_active(), self.n_prod);
            n_inn - n_new
        };

        if n_free > 0 {
            let prod_dist = Uniform::new(0, self.n_prod)?;
            for _ in 0..n_free {
                counts[prod_dist.sample(rng)] += 1;
            }
        }

        Ok(counts)
    }
}

/// Innovators revive dormant products.
///
/// A product is dormant when nobody chose it within the memory window.
#[derive(Debug)]
pub struct RevivingInnovation {
    n_prod: usize,
    enabled: bool,
    pool: Vec<usize>,
}

impl RevivingInnovation {
    pub fn new(n_prod: usize, prob_inn: f64) -> Self {
        Self {
            n_prod,
            enabled: prob_inn > 0.0,
            pool: Vec::with_capacity(n_prod),
        }
    }

    /// Get the dormant products found by the last call to `prepare`.
    #[cfg(test)]
    pub fn pool(&self) -> &[usize] {
        &self.pool
    }
}

impl InnovationAllocator for RevivingInnovation {
    fn n_prod_init(&self) -> usize {
        self.n_prod
    }

    fn prepare(&mut self, weights: &[usize]) -> bool {
        self.pool.clear();
        // Nobody innovates anyway, skip the scan.
        if !self.enabled {
            return false;
        }
        self.pool.extend(
            weights
                .iter()
                .enumerate()
                .filter(|&(_, &weight)| weight == 0)
                .map(|(prod, _)| prod),
        );
        !self.pool.is_empty()
    }

    fn allocate<R: Rng + ?Sized>(&mut self, n_inn: usize, rng: &mut R) -> Result<Vec<usize>> {
        let mut counts = vec![0; self.n_prod];
        for _ in 0..n_inn {
            let &prod = self
                .pool
                .choose(rng)
                .context("failed to choose a dormant product")?;
            counts[prod] += 1;
        }
        Ok(counts)
    }
}
