//! Random forest of gini-split decision trees over dense numeric features.
//!
//! Trees split on thresholds, so the forest is insensitive to feature scaling.
//! Training is deterministic for a given seed.

use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        distribution: Vec<f64>,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [usize],
    n_classes: usize,
    max_features: usize,
    params: &'a ForestParams,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    fn build(&mut self, samples: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let distribution = class_distribution(self.y, &samples, self.n_classes);
        let depth_exhausted = self.params.max_depth.is_some_and(|max| depth >= max);
        let pure = distribution.iter().filter(|p| **p > 0.0).count() <= 1;

        if depth_exhausted || pure || samples.len() < self.params.min_samples_split {
            return self.push(Node::Leaf { distribution });
        }

        let Some((feature, threshold)) = self.best_split(&samples, rng) else {
            return self.push(Node::Leaf { distribution });
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&sample| self.x[sample][feature] <= threshold);

        // reserve the slot so children land after their parent
        let slot = self.push(Node::Leaf {
            distribution: Vec::new(),
        });
        let left = self.build(left_samples, depth + 1, rng);
        let right = self.build(right_samples, depth + 1, rng);
        self.nodes[slot] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        slot
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Best gini split over a random subset of features, if any split separates the samples.
    fn best_split(&self, samples: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n_features = self.x.first().map(Vec::len).unwrap_or(0);
        if n_features == 0 {
            return None;
        }

        let total = samples.len() as f64;
        let mut parent_counts = vec![0.0; self.n_classes];
        for &sample in samples {
            parent_counts[self.y[sample]] += 1.0;
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for feature in index::sample(rng, n_features, self.max_features.min(n_features)) {
            let mut ordered: Vec<usize> = samples.to_vec();
            ordered.sort_by(|a, b| self.x[*a][feature].total_cmp(&self.x[*b][feature]));

            let mut left_counts = vec![0.0; self.n_classes];
            for position in 0..ordered.len() - 1 {
                let sample = ordered[position];
                left_counts[self.y[sample]] += 1.0;

                let here = self.x[sample][feature];
                let next = self.x[ordered[position + 1]][feature];
                if here == next {
                    continue;
                }

                let n_left = (position + 1) as f64;
                let n_right = total - n_left;
                let right_counts: Vec<f64> = parent_counts
                    .iter()
                    .zip(&left_counts)
                    .map(|(parent, left)| parent - left)
                    .collect();
                let impurity = (n_left / total) * gini(&left_counts, n_left)
                    + (n_right / total) * gini(&right_counts, n_right);

                if best.is_none_or(|(_, _, current)| impurity < current) {
                    best = Some((feature, (here + next) / 2.0, impurity));
                }
            }
        }

        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

impl DecisionTree {
    fn fit(
        x: &[Vec<f64>],
        y: &[usize],
        samples: Vec<usize>,
        n_classes: usize,
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Self {
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        let mut builder = TreeBuilder {
            x,
            y,
            n_classes,
            max_features: ((n_features as f64).sqrt().ceil() as usize).max(1),
            params,
            nodes: Vec::new(),
        };
        builder.build(samples, 0, rng);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Children come after their parent, so traversal always terminates.
    fn check(&self, n_classes: usize, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::ModelUnavailable("decision tree has no nodes".to_string()));
        }
        for (position, node) in self.nodes.iter().enumerate() {
            let valid = match node {
                Node::Leaf { distribution } => distribution.len() == n_classes,
                Node::Split {
                    feature, left, right, ..
                } => {
                    *feature < n_features
                        && (position + 1..self.nodes.len()).contains(left)
                        && (position + 1..self.nodes.len()).contains(right)
                }
            };
            if !valid {
                return Err(Error::ModelUnavailable(format!("decision tree node {position} is inconsistent")));
            }
        }
        Ok(())
    }

    fn distribution(&self, row: &[f64]) -> Option<&[f64]> {
        let mut current = 0;
        loop {
            match self.nodes.get(current)? {
                Node::Leaf { distribution } => return Some(distribution),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature)?;
                    current = if *value <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest<L> {
    classes: Vec<L>,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl<L: Clone + Ord> RandomForest<L> {
    /// Fits `params.n_trees` trees, each on a bootstrap sample of the rows.
    pub fn fit(x: &[Vec<f64>], labels: &[L], params: &ForestParams) -> Self {
        let mut classes: Vec<L> = labels.to_vec();
        classes.sort();
        classes.dedup();

        let y: Vec<usize> = labels
            .iter()
            .filter_map(|label| classes.binary_search(label).ok())
            .collect();
        let n_features = x.first().map(Vec::len).unwrap_or(0);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = if x.is_empty() {
            Vec::new()
        } else {
            (0..params.n_trees.max(1))
                .map(|_| {
                    let bootstrap: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
                    DecisionTree::fit(x, &y, bootstrap, classes.len(), params, &mut rng)
                })
                .collect()
        };

        Self {
            classes,
            n_features,
            trees,
        }
    }

    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn check(&self) -> Result<()> {
        if self.classes.is_empty() || self.trees.is_empty() {
            return Err(Error::ModelUnavailable("random forest has no classes or no trees".to_string()));
        }
        self.trees
            .iter()
            .try_for_each(|tree| tree.check(self.classes.len(), self.n_features))
    }

    /// Mean of the leaf distributions across trees, or `None` on a feature-width mismatch.
    pub fn predict_proba(&self, row: &[f64]) -> Option<Vec<f64>> {
        if row.len() != self.n_features || self.trees.is_empty() {
            return None;
        }
        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let distribution = tree.distribution(row)?;
            for (total, p) in totals.iter_mut().zip(distribution) {
                *total += p;
            }
        }
        let n = self.trees.len() as f64;
        Some(totals.into_iter().map(|total| total / n).collect())
    }

    pub fn predict(&self, row: &[f64]) -> Option<(L, f64)> {
        let proba = self.predict_proba(row)?;
        let index = super::bayes::arg_max(&proba)?;
        Some((self.classes.get(index)?.clone(), *proba.get(index)?))
    }
}

fn class_distribution(y: &[usize], samples: &[usize], n_classes: usize) -> Vec<f64> {
    let mut counts = vec![0.0; n_classes];
    for &sample in samples {
        counts[y[sample]] += 1.0;
    }
    let total = samples.len().max(1) as f64;
    counts.into_iter().map(|count| count / total).collect()
}

fn gini(counts: &[f64], total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    1.0 - counts.iter().map(|count| (count / total).powi(2)).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> (Vec<Vec<f64>>, Vec<&'static str>) {
        // feature 0 separates the classes; feature 1 is noise
        let x = vec![
            vec![0.0, 5.0],
            vec![0.0, 1.0],
            vec![1.0, 3.0],
            vec![3.0, 2.0],
            vec![4.0, 5.0],
            vec![5.0, 1.0],
        ];
        let y = vec!["low", "low", "low", "high", "high", "high"];
        (x, y)
    }

    #[test]
    fn learns_a_separable_split() {
        let (x, y) = toy();
        let forest = RandomForest::fit(&x, &y, &ForestParams { n_trees: 25, ..Default::default() });
        assert_eq!(forest.predict(&[0.0, 4.0]).unwrap().0, "low");
        assert_eq!(forest.predict(&[5.0, 4.0]).unwrap().0, "high");
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = toy();
        let forest = RandomForest::fit(&x, &y, &ForestParams::default());
        let proba = forest.predict_proba(&[2.0, 2.0]).unwrap();
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = toy();
        let params = ForestParams { n_trees: 10, ..Default::default() };
        assert_eq!(RandomForest::fit(&x, &y, &params), RandomForest::fit(&x, &y, &params));
    }

    #[test]
    fn rejects_wrong_feature_width() {
        let (x, y) = toy();
        let forest = RandomForest::fit(&x, &y, &ForestParams { n_trees: 3, ..Default::default() });
        assert!(forest.predict(&[1.0]).is_none());
    }

    #[test]
    fn inconsistent_forest_fails_the_check() {
        let (x, y) = toy();
        let forest = RandomForest::fit(&x, &y, &ForestParams { n_trees: 3, ..Default::default() });
        forest.check().unwrap();

        let mut short_classes = forest.clone();
        short_classes.classes.pop();
        assert!(matches!(short_classes.check(), Err(Error::ModelUnavailable(_))));

        let mut cyclic = forest;
        cyclic.trees[0].nodes[0] = Node::Split {
            feature: 0,
            threshold: 1.0,
            left: 0,
            right: 0,
        };
        assert!(cyclic.check().is_err());
    }

    #[test]
    fn depth_limit_yields_leaves() {
        let (x, y) = toy();
        let params = ForestParams {
            n_trees: 5,
            max_depth: Some(0),
            ..Default::default()
        };
        let forest = RandomForest::fit(&x, &y, &params);
        assert!(forest.trees.iter().all(|tree| tree.nodes.len() == 1));
    }
}
