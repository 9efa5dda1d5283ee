use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::{simulate_random_inn, simulate_revive_inn};
use crate::model::Outcome;
use crate::policy::Policy;
use anyhow::{Context, Result};
use glob::glob;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// Output of a single run.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub seed: u64,
    pub policy: Policy,
    pub outcome: Outcome,
}

const OUTPUT_FILE: &str = "output.msgpack";

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn create_run(&self, seed: Option<u64>) -> Result<()> {
        let seed = seed.unwrap_or_else(rand::random);
        log::info!("using seed {seed}");

        let record = self.simulate(seed).context("failed to run simulation")?;
        if let Outcome::Whole(mat) = &record.outcome {
            log::info!(
                "kept adoption matrix of {} products over {} steps",
                mat.n_prod(),
                mat.n_steps()
            );
        }

        let run_dir = self.next_run_dir().context("failed to find next run dir")?;
        fs::create_dir_all(&run_dir).with_context(|| format!("failed to create {run_dir:?}"))?;
        log::info!("created {run_dir:?}");

        let output_file = run_dir.join(OUTPUT_FILE);
        if let Err(error) = write_record(&output_file, &record) {
            fs::remove_dir_all(&run_dir).ok();
            return Err(error).with_context(|| format!("failed to write {output_file:?}"));
        }
        log::info!("wrote {output_file:?}");

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let mut analyzer = Analyzer::new(self.cfg.model.n_prod);

        for run_dir in self.run_dirs().context("failed to list run dirs")? {
            let output_file = run_dir.join(OUTPUT_FILE);
            if !output_file.is_file() {
                log::warn!("skipping {run_dir:?}: no output file");
                continue;
            }
            let record = read_record(&output_file)
                .with_context(|| format!("failed to read {output_file:?}"))?;
            analyzer
                .add_dist(&record.outcome.final_dist())
                .context("failed to add run")?;
        }
        log::info!("analyzed {} runs", analyzer.n_runs());

        analyzer
            .save_results(self.results_file())
            .context("failed to save results")?;

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        for run_dir in self.run_dirs().context("failed to list run dirs")? {
            fs::remove_dir_all(&run_dir)
                .with_context(|| format!("failed to remove {run_dir:?}"))?;
            log::info!("removed {run_dir:?}");
        }

        let results_file = self.results_file();
        if results_file.exists() {
            fs::remove_file(&results_file)
                .with_context(|| format!("failed to remove {results_file:?}"))?;
            log::info!("removed {results_file:?}");
        }

        Ok(())
    }

    fn simulate(&self, seed: u64) -> Result<RunRecord> {
        let model = &self.cfg.model;
        let n_people = self.cfg.population.n_people()?;
        let whole_dist = self.cfg.output.whole_dist;
        let rng = ChaCha12Rng::seed_from_u64(seed);

        let outcome = match model.policy {
            Policy::Random => simulate_random_inn(
                &n_people,
                model.mem,
                model.prob_inn,
                model.n_prod,
                model.n_prod_init,
                whole_dist,
                rng,
            )?,
            Policy::Revive => simulate_revive_inn(
                &n_people,
                model.mem,
                model.prob_inn,
                model.n_prod,
                whole_dist,
                rng,
            )?,
        };

        Ok(RunRecord {
            seed,
            policy: model.policy,
            outcome,
        })
    }

    fn run_dirs(&self) -> Result<Vec<PathBuf>> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let run_dirs = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .collect();
        Ok(run_dirs)
    }

    fn next_run_dir(&self) -> Result<PathBuf> {
        let mut run_idx = self.run_dirs()?.len();
        while self.run_dir(run_idx).exists() {
            run_idx += 1;
        }
        Ok(self.run_dir(run_idx))
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn results_file(&self) -> PathBuf {
        self.sim_dir.join("results.msgpack")
    }
}

fn write_record(file: &Path, record: &RunRecord) -> Result<()> {
    let file = File::create(file).context("failed to create file")?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, record).context("failed to serialize record")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}

fn read_record(file: &Path) -> Result<RunRecord> {
    let file = File::open(file).context("failed to open file")?;
    let mut reader = BufReader::new(file);
    let record = decode::from_read(&mut reader).context("failed to deserialize record")?;
    Ok(record)
}
