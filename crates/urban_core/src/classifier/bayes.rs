//! TF-IDF features and a multinomial naive Bayes text classifier.

use crate::text::CleanText;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Keeps the `max_features` most frequent terms across the corpus.
    ///
    /// IDF uses the smoothed form `ln((1 + n) / (1 + df)) + 1`.
    pub fn fit(documents: &[CleanText], stop_words: &HashSet<String>, max_features: usize) -> Self {
        let mut term_counts: HashMap<&str, usize> = HashMap::new();
        let mut doc_freq: HashMap<&str, usize> = HashMap::new();

        for doc in documents {
            let mut seen = HashSet::new();
            for token in doc.tokens(stop_words) {
                *term_counts.entry(token).or_insert(0) += 1;
                if seen.insert(token) {
                    *doc_freq.entry(token).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&str, usize)> = term_counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked.truncate(max_features);

        let mut terms: Vec<&str> = ranked.into_iter().map(|(term, _)| term).collect();
        terms.sort_unstable();

        let n_docs = documents.len() as f64;
        let vocabulary: BTreeMap<String, usize> = terms
            .iter()
            .enumerate()
            .map(|(index, term)| (term.to_string(), index))
            .collect();
        let idf = terms
            .iter()
            .map(|term| {
                let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
                ((1.0 + n_docs) / (1.0 + df)).ln() + 1.0
            })
            .collect();

        Self { vocabulary, idf }
    }

    pub fn n_features(&self) -> usize {
        self.idf.len()
    }

    /// Every vocabulary entry must point at an IDF weight.
    pub fn check(&self) -> Result<()> {
        match self.vocabulary.iter().find(|(_, index)| **index >= self.idf.len()) {
            Some((term, index)) => Err(Error::ModelUnavailable(format!(
                "term {term:?} maps to feature {index} but only {} IDF weights are stored",
                self.idf.len()
            ))),
            None => Ok(()),
        }
    }

    /// Sparse, L2-normalised TF-IDF vector. Empty when no token is in vocabulary.
    pub fn transform(&self, doc: &CleanText) -> Vec<(usize, f64)> {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in doc.text.split(' ') {
            if let Some(&index) = self.vocabulary.get(token) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        let mut weighted: Vec<(usize, f64)> = counts
            .into_iter()
            .filter_map(|(index, tf)| self.idf.get(index).map(|idf| (index, tf * idf)))
            .collect();
        let norm = weighted.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, value) in &mut weighted {
                *value /= norm;
            }
        }
        weighted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialNb<L> {
    classes: Vec<L>,
    class_log_prior: Vec<f64>,
    feature_log_prob: Vec<Vec<f64>>,
}

impl<L: Clone + Ord> MultinomialNb<L> {
    /// Fits with additive (Laplace) smoothing `alpha`.
    pub fn fit(rows: &[Vec<(usize, f64)>], labels: &[L], n_features: usize, alpha: f64) -> Self {
        let mut classes: Vec<L> = labels.to_vec();
        classes.sort();
        classes.dedup();

        let mut class_counts = vec![0usize; classes.len()];
        let mut feature_counts = vec![vec![0.0; n_features]; classes.len()];

        for (row, label) in rows.iter().zip(labels) {
            let Ok(class) = classes.binary_search(label) else {
                continue;
            };
            class_counts[class] += 1;
            for &(feature, value) in row {
                feature_counts[class][feature] += value;
            }
        }

        let total = rows.len().max(1) as f64;
        let class_log_prior = class_counts
            .iter()
            .map(|&count| (count as f64 / total).ln())
            .collect();

        let feature_log_prob = feature_counts
            .iter()
            .map(|counts| {
                let denom: f64 = counts.iter().sum::<f64>() + alpha * n_features as f64;
                counts
                    .iter()
                    .map(|count| ((count + alpha) / denom).ln())
                    .collect()
            })
            .collect();

        Self {
            classes,
            class_log_prior,
            feature_log_prob,
        }
    }

    pub fn classes(&self) -> &[L] {
        &self.classes
    }

    /// Class and feature tables must agree with each other and with `n_features`.
    pub fn check(&self, n_features: usize) -> Result<()> {
        let n_classes = self.classes.len();
        if n_classes == 0 {
            return Err(Error::ModelUnavailable("naive Bayes model has no classes".to_string()));
        }
        if self.class_log_prior.len() != n_classes || self.feature_log_prob.len() != n_classes {
            return Err(Error::ModelUnavailable(format!(
                "naive Bayes model has {n_classes} classes, {} priors and {} feature rows",
                self.class_log_prior.len(),
                self.feature_log_prob.len()
            )));
        }
        if let Some(row) = self.feature_log_prob.iter().find(|row| row.len() != n_features) {
            return Err(Error::ModelUnavailable(format!(
                "naive Bayes feature row has {} entries, expected {n_features}",
                row.len()
            )));
        }
        Ok(())
    }

    /// Posterior probabilities in `classes()` order.
    pub fn predict_proba(&self, row: &[(usize, f64)]) -> Vec<f64> {
        let joint: Vec<f64> = self
            .class_log_prior
            .iter()
            .zip(&self.feature_log_prob)
            .map(|(prior, log_probs)| {
                prior
                    + row
                        .iter()
                        .filter_map(|&(feature, value)| log_probs.get(feature).map(|lp| lp * value))
                        .sum::<f64>()
            })
            .collect();
        softmax(&joint)
    }

    pub fn predict(&self, row: &[(usize, f64)]) -> Option<(L, f64)> {
        let proba = self.predict_proba(row);
        let index = arg_max(&proba)?;
        Some((self.classes.get(index)?.clone(), *proba.get(index)?))
    }
}

pub(crate) fn softmax(log_values: &[f64]) -> Vec<f64> {
    let max = log_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; log_values.len()];
    }
    let exp: Vec<f64> = log_values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|v| v / sum).collect()
}

/// Index of the largest value; the first one wins ties.
pub(crate) fn arg_max(values: &[f64]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (index, &value)| match best {
            Some((_, top)) if top >= value => best,
            _ => Some((index, value)),
        })
        .map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{english_stop_words, normalize};

    fn corpus() -> (Vec<CleanText>, Vec<&'static str>) {
        let docs = [
            ("pothole on the road", "road"),
            ("deep pothole near the crossing", "road"),
            ("cracked road surface", "road"),
            ("streetlight out on corner", "light"),
            ("power outage streetlight dark", "light"),
            ("flickering streetlight", "light"),
        ];
        (
            docs.iter().map(|(text, _)| normalize(text)).collect(),
            docs.iter().map(|(_, label)| *label).collect(),
        )
    }

    #[test]
    fn vectorizer_drops_stop_words_and_caps_features() {
        let (docs, _) = corpus();
        let stop = english_stop_words();
        let full = TfidfVectorizer::fit(&docs, &stop, 1000);
        assert!(!full.vocabulary.contains_key("the"));
        assert!(full.vocabulary.contains_key("pothole"));

        let capped = TfidfVectorizer::fit(&docs, &stop, 2);
        assert_eq!(capped.n_features(), 2);
        // streetlight (3), then the alphabetical first of the terms seen twice
        assert!(capped.vocabulary.contains_key("streetlight"));
        assert!(capped.vocabulary.contains_key("pothole"));
    }

    #[test]
    fn transform_is_unit_length() {
        let (docs, _) = corpus();
        let vectorizer = TfidfVectorizer::fit(&docs, &english_stop_words(), 1000);
        let row = vectorizer.transform(&normalize("pothole road pothole"));
        let norm: f64 = row.iter().map(|(_, v)| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(vectorizer.transform(&normalize("zebra")).is_empty());
    }

    #[test]
    fn naive_bayes_separates_obvious_classes() {
        let (docs, labels) = corpus();
        let vectorizer = TfidfVectorizer::fit(&docs, &english_stop_words(), 1000);
        let rows: Vec<_> = docs.iter().map(|doc| vectorizer.transform(doc)).collect();
        let nb = MultinomialNb::fit(&rows, &labels, vectorizer.n_features(), 1.0);

        let (label, confidence) = nb.predict(&vectorizer.transform(&normalize("huge pothole"))).unwrap();
        assert_eq!(label, "road");
        assert!(confidence > 0.5 && confidence <= 1.0);

        let proba = nb.predict_proba(&vectorizer.transform(&normalize("streetlight dark")));
        assert!((proba.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mismatched_tables_fail_the_check() {
        let (docs, labels) = corpus();
        let mut vectorizer = TfidfVectorizer::fit(&docs, &english_stop_words(), 1000);
        let rows: Vec<_> = docs.iter().map(|doc| vectorizer.transform(doc)).collect();
        let mut nb = MultinomialNb::fit(&rows, &labels, vectorizer.n_features(), 1.0);
        vectorizer.check().unwrap();
        nb.check(vectorizer.n_features()).unwrap();
        assert!(nb.check(vectorizer.n_features() + 1).is_err());

        vectorizer.idf.truncate(1);
        assert!(matches!(vectorizer.check(), Err(Error::ModelUnavailable(_))));
        // out-of-range terms are skipped rather than indexed
        let _ = vectorizer.transform(&normalize("pothole streetlight road"));

        nb.classes.pop();
        assert!(matches!(nb.check(nb.feature_log_prob[0].len()), Err(Error::ModelUnavailable(_))));
        // "road" was dropped, so its posterior slot has no label
        assert!(nb.predict(&rows[0]).is_none());
    }

    #[test]
    fn arg_max_prefers_first_on_ties() {
        assert_eq!(arg_max(&[0.5, 0.5]), Some(0));
        assert_eq!(arg_max(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(arg_max(&[]), None);
    }
}
