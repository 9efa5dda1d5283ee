use serde::{Deserialize, Serialize};

/// Streaming summary of a sequence of values.
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
    min: f64,
    max: f64,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        // Welford update.
        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;
        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;

        self.min = self.min.min(val);
        self.max = self.max.max(val);
    }

    pub fn report(&self) -> AccumulatorReport {
        if self.n_vals == 0 {
            return AccumulatorReport {
                n_vals: 0,
                mean: f64::NAN,
                std_dev: f64::NAN,
                min: f64::NAN,
                max: f64::NAN,
            };
        }
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals - 1) as f64).sqrt()
            } else {
                f64::NAN
            },
            min: self.min,
            max: self.max,
        }
    }
}

/// Shares of a distribution sorted from most to least adopted.
///
/// Returns an empty vector if nothing was adopted.
pub fn rank_shares(dist: &[usize]) -> Vec<f64> {
    let total: usize = dist.iter().sum();
    if total == 0 {
        return Vec::new();
    }
    let mut sorted = dist.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted
        .into_iter()
        .map(|count| count as f64 / total as f64)
        .collect()
}
