//! Unsupervised outlier scorers.
//!
//! Detection orchestration only sees the [`OutlierScorer`] trait, so the
//! statistical model can be swapped without touching threshold handling or
//! report assembly.

use crate::domain::anomaly::Severity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Scores a window of feature vectors. Higher scores are more anomalous.
/// Implementations must be deterministic for identical input.
pub trait OutlierScorer: Send + Sync {
    fn name(&self) -> &'static str;

    /// One score per input vector, index-aligned.
    fn score(&self, features: &[Vec<f64>]) -> Vec<f64>;

    fn severity(&self, score: f64) -> Severity;
}

/// Isolation forest over a whole window. Trees are grown on random subsamples
/// from a seeded generator, so identical input scores identically.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: usize,
    subsample_size: usize,
    seed: u64,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

/// Nodes live in a flat arena; children are referenced by position.
#[derive(Debug, Clone)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], indices: &mut [usize], max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(data, indices, 0, max_depth, rng);
        tree
    }

    fn grow_node(
        &mut self,
        data: &[Vec<f64>],
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            size: indices.len(),
        });
        if depth >= max_depth || indices.len() <= 1 {
            return id;
        }

        let dims = data[indices[0]].len();
        let splittable: Vec<(usize, f64, f64)> = (0..dims)
            .filter_map(|d| {
                let (lo, hi) = indices
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                        (lo.min(data[i][d]), hi.max(data[i][d]))
                    });
                // A threshold can only be drawn from a finite, non-empty range.
                (hi > lo && (hi - lo).is_finite()).then_some((d, lo, hi))
            })
            .collect();
        if splittable.is_empty() {
            return id;
        }

        let (feature, lo, hi) = splittable[rng.random_range(0..splittable.len())];
        let threshold = rng.random_range(lo..hi);

        let mut mid = 0;
        for i in 0..indices.len() {
            if data[indices[i]][feature] < threshold {
                indices.swap(i, mid);
                mid += 1;
            }
        }

        let (left_indices, right_indices) = indices.split_at_mut(mid);
        let left = self.grow_node(data, left_indices, depth + 1, max_depth, rng);
        let right = self.grow_node(data, right_indices, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
                Node::Leaf { size } => return depth + average_path_length(*size),
            }
        }
    }
}

/// Expected path length of an unsuccessful search in a binary search tree of
/// `n` points.
fn average_path_length(n: usize) -> f64 {
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
    pub fn new(trees: usize, subsample_size: usize, seed: u64) -> Self {
        Self {
            trees: trees.max(1),
            subsample_size: subsample_size.max(2),
            seed,
        }
    }
}

impl OutlierScorer for IsolationForest {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn score(&self, features: &[Vec<f64>]) -> Vec<f64> {
        let n = features.len();
        if n < 2 {
            return vec![0.0; n];
        }

        let psi = self.subsample_size.min(n);
        let max_depth = (psi as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let forest: Vec<IsolationTree> = (0..self.trees)
            .map(|_| {
                let mut subsample = rand::seq::index::sample(&mut rng, n, psi).into_vec();
                IsolationTree::grow(features, &mut subsample, max_depth, &mut rng)
            })
            .collect();

        let normalizer = average_path_length(psi);
        features
            .iter()
            .map(|point| {
                let mean_path = forest.iter().map(|t| t.path_length(point)).sum::<f64>()
                    / forest.len() as f64;
                2f64.powf(-mean_path / normalizer)
            })
            .collect()
    }

    fn severity(&self, score: f64) -> Severity {
        if score >= 0.70 {
            Severity::High
        } else if score >= 0.60 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Largest absolute z-score across features.
#[derive(Debug, Clone, Default)]
pub struct ZScoreScorer;

impl OutlierScorer for ZScoreScorer {
    fn name(&self) -> &'static str {
        "z_score"
    }

    fn score(&self, features: &[Vec<f64>]) -> Vec<f64> {
        let n = features.len();
        let Some(dims) = features.first().map(Vec::len) else {
            return Vec::new();
        };

        let stats: Vec<(f64, f64)> = (0..dims)
            .map(|d| {
                let mean = features.iter().map(|f| f[d]).sum::<f64>() / n as f64;
                let var = features.iter().map(|f| (f[d] - mean).powi(2)).sum::<f64>() / n as f64;
                let std = var.sqrt();
                // Overflowing dimensions carry no usable spread.
                if mean.is_finite() && std.is_finite() {
                    (mean, std)
                } else {
                    (0.0, 0.0)
                }
            })
            .collect();

        features
            .iter()
            .map(|f| {
                stats
                    .iter()
                    .enumerate()
                    .map(|(d, (mean, std))| {
                        if *std > f64::EPSILON {
                            ((f[d] - mean) / std).abs()
                        } else {
                            0.0
                        }
                    })
                    .fold(0.0, f64::max)
            })
            .collect()
    }

    fn severity(&self, score: f64) -> Severity {
        if score >= 5.0 {
            Severity::High
        } else if score >= 4.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tight cluster on a slow ramp with one far point at `spike`.
    fn window(n: usize, spike: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                if i == spike {
                    vec![75.0, 180.0, 60.0]
                } else {
                    let jitter = (i % 5) as f64 * 0.1;
                    vec![48.0 + jitter, 10.0 + jitter, 25.0 + jitter]
                }
            })
            .collect()
    }

    fn argmax(scores: &[f64]) -> usize {
        scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
            .0
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!((average_path_length(256) - 10.244_770_920_116_851).abs() < 1e-9);
    }

    #[test]
    fn test_isolation_forest_isolates_spike() {
        let data = window(60, 37);
        let scores = IsolationForest::new(100, 256, 42).score(&data);

        assert_eq!(scores.len(), 60);
        assert_eq!(argmax(&scores), 37);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[37] > 0.6);
    }

    #[test]
    fn test_isolation_forest_is_reproducible() {
        let data = window(40, 5);
        let forest = IsolationForest::new(50, 32, 7);
        assert_eq!(forest.score(&data), forest.score(&data));
    }

    #[test]
    fn test_constant_window_scores_uniformly() {
        let data = vec![vec![1.0, 2.0]; 30];
        let scores = IsolationForest::new(10, 16, 42).score(&data);
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_unbounded_feature_range_is_not_split() {
        let mut data = window(30, 3);
        data[10] = vec![1.7e308, 10.0, 25.0];
        data[11] = vec![-1.7e308, 10.0, 25.0];

        let scores = IsolationForest::new(20, 32, 42).score(&data);
        assert_eq!(scores.len(), 30);
        assert!(scores.iter().all(|s| s.is_finite()));

        let scores = ZScoreScorer.score(&data);
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_zscore_flags_spike() {
        let data = window(50, 12);
        let scorer = ZScoreScorer;
        let scores = scorer.score(&data);

        assert_eq!(argmax(&scores), 12);
        assert_eq!(scorer.severity(scores[12]), Severity::High);
    }
}
