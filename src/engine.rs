use crate::config::check_num;
use crate::model::{AdoptionMatrix, Outcome};
use crate::policy::{InnovationAllocator, RandomInnovation, RevivingInnovation};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Uniform, weighted::WeightedIndex};

/// Parameters shared by all innovation policies.
#[derive(Debug, Clone)]
pub struct Params {
    /// Number of past steps agents look back on.
    pub mem: usize,
    /// Probability that an agent innovates.
    pub prob_inn: f64,
    /// Total number of products.
    pub n_prod: usize,
}

/// Simulation engine.
///
/// Holds the parameters, innovation allocator, random number generator and
/// the adoption matrix built so far.
pub struct Engine<A> {
    par: Params,
    alloc: A,
    rng: ChaCha12Rng,
    mat: AdoptionMatrix,
}

impl<A: InnovationAllocator> Engine<A> {
    pub fn new(par: Params, alloc: A, rng: ChaCha12Rng) -> Result<Self> {
        check_num(par.n_prod, 1..).context("invalid number of products")?;
        check_num(par.prob_inn, 0.0..=1.0).context("invalid innovation probability")?;
        check_num(alloc.n_prod_init(), 1..=par.n_prod)
            .context("invalid initial number of products")?;

        let mat = AdoptionMatrix::new(par.n_prod, 0);
        Ok(Self {
            par,
            alloc,
            rng,
            mat,
        })
    }

    /// Run one step per entry of `n_people` and return the adoption matrix.
    pub fn perform_simulation(mut self, n_people: &[usize]) -> Result<AdoptionMatrix> {
        let Some((&n_agt_init, n_people_rest)) = n_people.split_first() else {
            bail!("population sequence must have at least one step");
        };
        self.mat = AdoptionMatrix::new(self.par.n_prod, n_people.len());

        self.seed_first_cohort(n_agt_init)
            .context("failed to seed first cohort")?;

        let n_steps = n_people.len();
        let steps_per_log = (n_steps / 10).max(1);
        for (step, &n_agt) in (1..).zip(n_people_rest) {
            self.perform_step(step, n_agt)
                .with_context(|| format!("failed to perform step {step}"))?;

            if (step + 1) % steps_per_log == 0 {
                let progress = 100.0 * (step + 1) as f64 / n_steps as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(self.mat)
    }

    fn seed_first_cohort(&mut self, n_agt: usize) -> Result<()> {
        let prod_dist = Uniform::new(0, self.alloc.n_prod_init())?;
        let mut col = vec![0; self.par.n_prod];
        for _ in 0..n_agt {
            col[prod_dist.sample(&mut self.rng)] += 1;
        }
        self.mat.push_col(col)
    }

    fn perform_step(&mut self, step: usize, n_agt: usize) -> Result<()> {
        // Popularity of each product over the memory window.
        let weights = self.mat.window_weights(window(step, self.par.mem));

        // Split the cohort into innovators and conformists.
        let n_inn = if self.alloc.prepare(&weights) {
            self.count_innovators(n_agt)?
        } else {
            0
        };
        log::debug!("step {step}: {n_inn} of {n_agt} agents innovate");

        let mut col = if n_inn > 0 {
            self.alloc
                .allocate(n_inn, &mut self.rng)
                .context("failed to allocate innovators")?
        } else {
            vec![0; self.par.n_prod]
        };

        self.sample_conformists(&weights, n_agt - n_inn, &mut col)
            .context("failed to sample conformists")?;

        self.mat.push_col(col)
    }

    fn count_innovators(&mut self, n_agt: usize) -> Result<usize> {
        let inn_dist = Bernoulli::new(self.par.prob_inn)?;
        let n_inn = (0..n_agt)
            .filter(|_| inn_dist.sample(&mut self.rng))
            .count();
        Ok(n_inn)
    }

    fn sample_conformists(
        &mut self,
        weights: &[usize],
        n_conf: usize,
        col: &mut [usize],
    ) -> Result<()> {
        if n_conf == 0 {
            return Ok(());
        }
        let total: usize = weights.iter().sum();
        if total == 0 {
            bail!("memory window holds no adoptions to copy from");
        }
        let prod_dist = WeightedIndex::new(weights)?;
        for _ in 0..n_conf {
            col[prod_dist.sample(&mut self.rng)] += 1;
        }
        Ok(())
    }
}

/// Steps visible from `step`: the last `mem` ones, never fewer than one.
fn window(step: usize, mem: usize) -> std::ops::Range<usize> {
    step.saturating_sub(mem.max(1))..step
}

/// Simulate with innovators unlocking new products.
///
/// Returns the whole adoption matrix if `whole_dist` is set and the final
/// distribution otherwise.
pub fn simulate_random_inn(
    n_people: &[usize],
    mem: usize,
    prob_inn: f64,
    n_prod: usize,
    n_prod_init: usize,
    whole_dist: bool,
    rng: ChaCha12Rng,
) -> Result<Outcome> {
    let alloc = RandomInnovation::new(n_prod, n_prod_init)?;
    let par = Params {
        mem,
        prob_inn,
        n_prod,
    };
    let mat = Engine::new(par, alloc, rng)?.perform_simulation(n_people)?;
    Ok(Outcome::new(mat, whole_dist))
}

/// Simulate with innovators reviving dormant products.
///
/// Returns the whole adoption matrix if `whole_dist` is set and the final
/// distribution otherwise. Unlike [`simulate_random_inn`] it takes no initial
/// number of products, since every product is open from the first step.
pub fn simulate_revive_inn(
    n_people: &[usize],
    mem: usize,
    prob_inn: f64,
    n_prod: usize,
    whole_dist: bool,
    rng: ChaCha12Rng,
) -> Result<Outcome> {
    let alloc = RevivingInnovation::new(n_prod, prob_inn);
    let par = Params {
        mem,
        prob_inn,
        n_prod,
    };
    let mat = Engine::new(par, alloc, rng)?.perform_simulation(n_people)?;
    Ok(Outcome::new(mat, whole_dist))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng(seed: u64) -> ChaCha12Rng {
        ChaCha12Rng::seed_from_u64(seed)
    }

    fn whole(outcome: Outcome) -> AdoptionMatrix {
        match outcome {
            Outcome::Whole(mat) => mat,
            Outcome::Final(_) => panic!("expected whole adoption matrix"),
        }
    }

    fn assert_conserved(mat: &AdoptionMatrix, n_people: &[usize]) {
        assert_eq!(mat.n_steps(), n_people.len());
        for (step, &n_agt) in n_people.iter().enumerate() {
            assert_eq!(mat.col(step).iter().sum::<usize>(), n_agt, "step {step}");
        }
    }

    #[test]
    fn window_never_empty() {
        assert_eq!(window(5, 0), 4..5);
        assert_eq!(window(5, 2), 3..5);
        assert_eq!(window(2, 10), 0..2);
    }

    #[test]
    fn two_step_scenario() {
        let n_people = [2, 3];
        let mat = whole(simulate_random_inn(&n_people, 1, 0.0, 2, 2, true, rng(0)).unwrap());
        assert_eq!(mat.n_prod(), 2);
        assert_conserved(&mat, &n_people);

        let dist = simulate_random_inn(&n_people, 1, 0.0, 2, 2, false, rng(0)).unwrap();
        assert_eq!(dist.final_dist().iter().sum::<usize>(), 5);
    }

    #[test]
    fn single_step_is_initialization_only() {
        for outcome in [
            simulate_random_inn(&[5], 4, 0.3, 3, 2, true, rng(1)).unwrap(),
            simulate_revive_inn(&[5], 4, 0.3, 3, true, rng(1)).unwrap(),
        ] {
            let mat = whole(outcome);
            assert_eq!(mat.rows().len(), 3);
            assert!(mat.rows().iter().all(|row| row.len() == 1));
            assert_eq!(mat.col(0).iter().sum::<usize>(), 5);
        }
    }

    #[test]
    fn first_cohort_uses_initial_pool() {
        let mat = whole(simulate_random_inn(&[40], 1, 0.0, 6, 2, true, rng(2)).unwrap());
        assert!(mat.col(0)[2..].iter().all(|&count| count == 0));
    }

    #[test]
    fn first_cohort_spreads_by_policy() {
        let mat = whole(simulate_revive_inn(&[60], 1, 0.0, 3, true, rng(11)).unwrap());
        assert!(mat.col(0).iter().all(|&count| count > 0));

        let mat = whole(simulate_random_inn(&[60], 1, 0.0, 3, 1, true, rng(11)).unwrap());
        assert_eq!(mat.col(0), &[60, 0, 0]);
    }

    #[test]
    fn both_policies_conserve_agents() {
        let n_people: Vec<usize> = (0..60).map(|step| 1 + step % 7).collect();
        for seed in 0..5 {
            let mat = whole(
                simulate_random_inn(&n_people, 3, 0.2, 25, 3, true, rng(seed)).unwrap(),
            );
            assert_conserved(&mat, &n_people);

            let mat =
                whole(simulate_revive_inn(&n_people, 3, 0.2, 25, true, rng(seed)).unwrap());
            assert_conserved(&mat, &n_people);
        }
    }

    #[test]
    fn innovators_unlock_products_in_order() {
        let n_people = [1; 8];
        let mat = whole(simulate_random_inn(&n_people, 2, 1.0, 5, 1, true, rng(3)).unwrap());
        assert_eq!(mat.get(0, 0), 1);
        for step in 1..5 {
            assert_eq!(mat.get(step, step), 1);
        }
        assert_conserved(&mat, &n_people);
    }

    #[test]
    fn innovators_overflowing_the_cap_spread_uniformly() {
        let mat = whole(simulate_random_inn(&[1, 4], 1, 1.0, 3, 1, true, rng(4)).unwrap());
        let col = mat.col(1);
        assert_eq!(col.iter().sum::<usize>(), 4);
        assert!(col[1] >= 1 && col[2] >= 1);
    }

    #[test]
    fn no_innovation_keeps_pool_closed() {
        let n_people = [6; 30];
        let mat = whole(simulate_random_inn(&n_people, 5, 0.0, 8, 3, true, rng(5)).unwrap());
        let dist = mat.final_dist();
        assert!(dist[3..].iter().all(|&count| count == 0));
    }

    #[test]
    fn revived_products_were_dormant() {
        let n_people = [3, 4, 4, 4, 4, 4, 4, 4, 4, 4];
        let mem = 2;
        let mat = whole(simulate_revive_inn(&n_people, mem, 1.0, 10, true, rng(6)).unwrap());
        for step in 1..n_people.len() {
            let weights = mat.window_weights(window(step, mem));
            for (prod, &count) in mat.col(step).iter().enumerate() {
                if count > 0 {
                    assert_eq!(weights[prod], 0, "step {step}, product {prod}");
                }
            }
        }
    }

    #[test]
    fn zero_memory_copies_previous_step() {
        let n_people = [4, 5, 5, 5, 5, 5];
        for seed in 0..5 {
            let mat = whole(simulate_revive_inn(&n_people, 0, 0.0, 4, true, rng(seed)).unwrap());
            for step in 1..n_people.len() {
                for prod in 0..4 {
                    if mat.get(prod, step - 1) == 0 {
                        assert_eq!(mat.get(prod, step), 0);
                    }
                }
            }
        }
    }

    #[test]
    fn same_seed_same_outcome() {
        let n_people = [5; 40];
        let a = simulate_random_inn(&n_people, 4, 0.1, 30, 2, true, rng(7)).unwrap();
        let b = simulate_random_inn(&n_people, 4, 0.1, 30, 2, true, rng(7)).unwrap();
        assert_eq!(a, b);

        let a = simulate_revive_inn(&n_people, 4, 0.0, 30, false, rng(8)).unwrap();
        let b = simulate_revive_inn(&n_people, 4, 0.0, 30, false, rng(8)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_window_fails() {
        let error = simulate_random_inn(&[0, 3], 1, 0.0, 2, 2, false, rng(9)).unwrap_err();
        assert!(format!("{error:#}").contains("memory window holds no adoptions"));
        assert!(simulate_revive_inn(&[0, 3], 1, 0.0, 2, false, rng(9)).is_err());
    }

    #[test]
    fn empty_cohorts_need_no_weights() {
        let outcome = simulate_revive_inn(&[0, 0, 0], 1, 0.5, 2, false, rng(10)).unwrap();
        assert_eq!(outcome, Outcome::Final(vec![0, 0]));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(simulate_random_inn(&[1], 1, 0.0, 2, 3, false, rng(0)).is_err());
        assert!(simulate_random_inn(&[1], 1, 1.5, 2, 1, false, rng(0)).is_err());
        assert!(simulate_revive_inn(&[1], 1, -0.1, 2, false, rng(0)).is_err());
        assert!(simulate_revive_inn(&[1], 1, 0.1, 0, false, rng(0)).is_err());
        assert!(simulate_revive_inn(&[], 1, 0.1, 2, false, rng(0)).is_err());
    }
}
