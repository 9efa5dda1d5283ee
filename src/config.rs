use crate::policy::Policy;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

const MAX_N_STEPS: usize = 10_000_000;
const MAX_N_AGT: usize = 100_000_000;

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub population: PopulationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Parameters of the choice model.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Innovation policy.
    pub policy: Policy,
    /// Number of past steps agents look back on.
    pub mem: usize,
    /// Probability that an agent innovates.
    pub prob_inn: f64,
    /// Total number of products.
    pub n_prod: usize,
    /// Number of products available at the first step (random policy only).
    #[serde(default = "default_n_prod_init")]
    pub n_prod_init: usize,
}

fn default_n_prod_init() -> usize {
    1
}

/// Number of agents entering at each step.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PopulationConfig {
    /// Cohort sizes given one by one.
    Explicit { n_people: Vec<usize> },
    /// Same cohort size at every step.
    Constant { n_agt: usize, n_steps: usize },
    /// Cohort size growing by a fixed amount each step.
    Linear {
        n_agt_init: usize,
        n_agt_step: usize,
        n_steps: usize,
    },
}

impl PopulationConfig {
    /// Expand into the cohort size of every step.
    ///
    /// # Errors
    /// Returns an error if the number of steps or any cohort size is out of range.
    pub fn n_people(&self) -> Result<Vec<usize>> {
        let n_people = match self {
            PopulationConfig::Explicit { n_people } => {
                check_num(n_people.len(), 1..MAX_N_STEPS).context("invalid number of steps")?;
                n_people.clone()
            }
            PopulationConfig::Constant { n_agt, n_steps } => {
                check_num(*n_steps, 1..MAX_N_STEPS).context("invalid number of steps")?;
                vec![*n_agt; *n_steps]
            }
            PopulationConfig::Linear {
                n_agt_init,
                n_agt_step,
                n_steps,
            } => {
                check_num(*n_steps, 1..MAX_N_STEPS).context("invalid number of steps")?;
                check_num(*n_agt_step, 0..MAX_N_AGT).context("invalid cohort increment")?;
                (0..*n_steps)
                    .map(|step| {
                        step.checked_mul(*n_agt_step)
                            .and_then(|inc| n_agt_init.checked_add(inc))
                            .with_context(|| format!("cohort size overflows at step {step}"))
                    })
                    .collect::<Result<_>>()?
            }
        };

        for (step, &n_agt) in n_people.iter().enumerate() {
            check_num(n_agt, 0..MAX_N_AGT)
                .with_context(|| format!("invalid cohort size at step {step}"))?;
        }

        Ok(n_people)
    }
}

/// Output options.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Keep the whole adoption matrix instead of the final distribution.
    #[serde(default)]
    pub whole_dist: bool,
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let model = &self.model;
        check_num(model.n_prod, 1..10_000_000).context("invalid number of products")?;
        check_num(model.prob_inn, 0.0..=1.0).context("invalid innovation probability")?;
        if model.policy == Policy::Random {
            check_num(model.n_prod_init, 1..=model.n_prod)
                .context("invalid initial number of products")?;
        }

        let n_people = self
            .population
            .n_people()
            .context("invalid population")?;
        if n_people[0] == 0 {
            bail!("first cohort must have at least one agent");
        }

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
