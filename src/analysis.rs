use crate::stats::{Accumulator, rank_shares};
use anyhow::{Context, Result};
use rmp_serde::encode;
use serde_value::Value;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

/// Observable computed from the final distribution of each run.
pub trait Obs {
    fn update(&mut self, dist: &[usize]) -> Result<()>;
    fn report(&self) -> Result<Value>;
}

/// Share of the product at each popularity rank.
pub struct RankShare {
    acc_vec: Vec<Accumulator>,
}

impl RankShare {
    pub fn new(n_prod: usize) -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(n_prod, Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for RankShare {
    fn update(&mut self, dist: &[usize]) -> Result<()> {
        let shares = rank_shares(dist);
        if shares.is_empty() {
            return Ok(());
        }
        for (acc, share) in self.acc_vec.iter_mut().zip(shares) {
            acc.add(share);
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        let reports: Vec<_> = self.acc_vec.iter().map(|acc| acc.report()).collect();
        report_value("rank_share", reports)
    }
}

/// Number of products adopted at least once.
pub struct NProdAdopted {
    acc: Accumulator,
}

impl NProdAdopted {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for NProdAdopted {
    fn update(&mut self, dist: &[usize]) -> Result<()> {
        let n_adopted = dist.iter().filter(|&&count| count > 0).count();
        self.acc.add(n_adopted as f64);
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        report_value("n_prod_adopted", self.acc.report())
    }
}

/// Share of the most adopted product.
pub struct TopShare {
    acc: Accumulator,
}

impl TopShare {
    pub fn new() -> Self {
        Self {
            acc: Accumulator::new(),
        }
    }
}

impl Obs for TopShare {
    fn update(&mut self, dist: &[usize]) -> Result<()> {
        if let Some(&share) = rank_shares(dist).first() {
            self.acc.add(share);
        }
        Ok(())
    }

    fn report(&self) -> Result<Value> {
        report_value("top_share", self.acc.report())
    }
}

fn report_value<T: serde::Serialize>(name: &str, report: T) -> Result<Value> {
    let report = serde_value::to_value(report)
        .with_context(|| format!("failed to convert {name} report"))?;
    let mut map = std::collections::BTreeMap::new();
    map.insert(Value::String(name.to_string()), report);
    Ok(Value::Map(map))
}

/// Collects observables over the final distributions of many runs.
pub struct Analyzer {
    n_runs: usize,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(n_prod: usize) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(RankShare::new(n_prod)),
            Box::new(NProdAdopted::new()),
            Box::new(TopShare::new()),
        ];
        Self {
            n_runs: 0,
            obs_ptr_vec,
        }
    }

    pub fn add_dist(&mut self, dist: &[usize]) -> Result<()> {
        for obs in &mut self.obs_ptr_vec {
            obs.update(dist).context("failed to update observable")?;
        }
        self.n_runs += 1;
        Ok(())
    }

    pub fn n_runs(&self) -> usize {
        self.n_runs
    }

    pub fn reports(&self) -> Result<Vec<Value>> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports = self.reports()?;
        encode::write_named(&mut writer, &reports).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(value: &Value, name: &str) -> Value {
        match value {
            Value::Map(map) => map[&Value::String(name.to_string())].clone(),
            _ => panic!("expected a map"),
        }
    }

    #[test]
    fn analyzer_summarizes_runs() {
        let mut analyzer = Analyzer::new(3);
        analyzer.add_dist(&[2, 0, 2]).unwrap();
        analyzer.add_dist(&[0, 4, 0]).unwrap();
        assert_eq!(analyzer.n_runs(), 2);

        let reports = analyzer.reports().unwrap();
        assert_eq!(reports.len(), 3);

        let n_adopted = field(&field(&reports[1], "n_prod_adopted"), "mean");
        assert_eq!(n_adopted, Value::F64(1.5));

        let top = field(&field(&reports[2], "top_share"), "mean");
        assert_eq!(top, Value::F64(0.75));
    }

    #[test]
    fn saved_results_read_back_whole() {
        let dir = std::env::temp_dir().join("imitari-results-test");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("results.msgpack");

        let mut analyzer = Analyzer::new(4);
        analyzer.add_dist(&[5, 1, 0, 2]).unwrap();
        analyzer.save_results(&file).unwrap();

        let reader = std::io::BufReader::new(File::open(&file).unwrap());
        let saved: Vec<Value> = rmp_serde::decode::from_read(reader).unwrap();
        assert_eq!(saved.len(), 3);
        let top = field(&field(&saved[2], "top_share"), "mean");
        assert_eq!(top, Value::F64(0.625));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_runs_do_not_count_towards_shares() {
        let mut analyzer = Analyzer::new(2);
        analyzer.add_dist(&[0, 0]).unwrap();
        let reports = analyzer.reports().unwrap();
        let top = field(&field(&reports[2], "top_share"), "n_vals");
        assert_eq!(top, Value::U64(0));
    }
}
