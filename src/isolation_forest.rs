//! One-dimensional isolation forest.
//!
//! Trees are grown on random subsamples with uniformly drawn split values;
//! points that isolate after few splits score close to 1. Every random draw
//! comes from a `StdRng` seeded by the caller, so a fixed seed reproduces the
//! same forest and the same scores.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// Subsample size cap per tree.
pub const MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
}

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` points, used to normalise path lengths.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

impl IsolationForest {
    /// Fits `n_trees` trees. Returns `None` for an empty input.
    pub fn fit(values: &[f64], n_trees: usize, seed: u64) -> Option<Self> {
        if values.is_empty() || n_trees == 0 {
            return None;
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let sample_size = values.len().min(MAX_SAMPLES);
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..n_trees)
            .map(|_| {
                let sample: Vec<f64> = values
                    .choose_multiple(&mut rng, sample_size)
                    .copied()
                    .collect();
                grow(&sample, 0, height_limit, &mut rng)
            })
            .collect();

        Some(Self { trees, sample_size })
    }

    /// Anomaly score `s = 2^(-E[h(x)] / c(n))` in (0, 1]; higher is more anomalous.
    pub fn anomaly_score(&self, x: f64) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, x, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        let norm = average_path_length(self.sample_size);
        if norm == 0.0 {
            return 0.5;
        }
        2f64.powf(-mean_path / norm)
    }

    /// Negated anomaly scores: lower means more abnormal.
    pub fn score_samples(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|x| -self.anomaly_score(*x)).collect()
    }
}

fn grow(values: &[f64], depth: usize, height_limit: usize, rng: &mut StdRng) -> Node {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    if depth >= height_limit || values.len() <= 1 || min >= max {
        return Node::Leaf { size: values.len() };
    }

    let threshold = rng.gen_range(min..max);
    let (left, right): (Vec<f64>, Vec<f64>) = values.iter().partition(|v| **v < threshold);

    Node::Split {
        threshold,
        left: Box::new(grow(&left, depth + 1, height_limit, rng)),
        right: Box::new(grow(&right, depth + 1, height_limit, rng)),
    }
}

fn path_length(node: &Node, x: f64, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            threshold,
            left,
            right,
        } => {
            if x < *threshold {
                path_length(left, x, depth + 1)
            } else {
                path_length(right, x, depth + 1)
            }
        }
    }
}

/// Linear-interpolated quantile of `values` at `q` in [0, 1].
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// Marks the points whose score falls strictly below the `contamination`
/// quantile of all scores.
pub fn outlier_mask(score_samples: &[f64], contamination: f64) -> Vec<bool> {
    match quantile(score_samples, contamination) {
        Some(offset) => score_samples.iter().map(|s| *s < offset).collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_with_spike() -> Vec<f64> {
        vec![
            100.0, 102.0, 98.0, 101.0, 99.0, 100.0, 5000.0, 103.0, 97.0, 100.0, 101.0, 99.0,
        ]
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_spike_scores_highest() {
        let values = series_with_spike();
        let forest = IsolationForest::fit(&values, 100, 42).unwrap();
        let spike = forest.anomaly_score(5000.0);
        for v in values.iter().filter(|v| **v < 1000.0) {
            assert!(spike > forest.anomaly_score(*v));
        }
    }

    #[test]
    fn test_fixed_seed_is_deterministic() {
        let values = series_with_spike();
        let a = IsolationForest::fit(&values, 50, 7).unwrap().score_samples(&values);
        let b = IsolationForest::fit(&values, 50, 7).unwrap().score_samples(&values);
        assert_eq!(a, b);
    }

    #[test]
    fn test_outlier_mask_flags_lowest_scores() {
        let scores = vec![-0.4, -0.45, -0.8, -0.42, -0.41, -0.43, -0.44, -0.46, -0.40, -0.39];
        let mask = outlier_mask(&scores, 0.1);
        assert!(mask[2]);
        assert_eq!(mask.iter().filter(|m| **m).count(), 1);
    }

    #[test]
    fn test_constant_series_flags_nothing() {
        let values = vec![10.0; 12];
        let forest = IsolationForest::fit(&values, 20, 42).unwrap();
        let mask = outlier_mask(&forest.score_samples(&values), 0.1);
        assert!(mask.iter().all(|m| !m));
    }
}
