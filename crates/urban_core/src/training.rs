//! Offline training of the category and priority models.
//!
//! Both models are fitted in memory and written to temporary files in the
//! models directory before either is renamed over its predecessor. A reader
//! never observes a half-written model, and if the second rename fails the
//! first file is restored, so a failed run leaves the old pair in place.

use crate::classifier::bayes::{MultinomialNb, TfidfVectorizer};
use crate::classifier::features::urgency_features;
use crate::classifier::forest::{ForestParams, RandomForest};
use crate::classifier::{
    CATEGORY_MODEL_FILE, CategoryModel, MODEL_FORMAT_VERSION, ModelFile, PRIORITY_MODEL_FILE,
    PriorityModel,
};
use crate::rules::Vocabulary;
use crate::schema::{Category, UrgencyLabel};
use crate::text::{self, CleanText};
use crate::timefmt::now_rfc3339;
use crate::{Error, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

pub const MIN_TRAINING_SAMPLES: usize = 10;

/// One labelled historical issue.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: UrgencyLabel,
}

#[derive(Debug, Clone)]
pub struct TrainingOptions {
    pub test_fraction: f64,
    pub seed: u64,
    pub max_features: usize,
    pub smoothing: f64,
    pub forest: ForestParams,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            max_features: 1000,
            smoothing: 1.0,
            forest: ForestParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_size: usize,
    pub test_size: usize,
    pub category_accuracy: f64,
    pub priority_accuracy: f64,
    pub category_model_path: PathBuf,
    pub priority_model_path: PathBuf,
}

/// Deterministic shuffled split; the test side gets `ceil(n * fraction)` rows.
fn split_indices(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let test_size = ((n as f64) * fraction).ceil() as usize;
    let test_size = test_size.clamp(1, n.saturating_sub(1));
    let train = indices.split_off(test_size);
    (train, indices)
}

fn accuracy<L: PartialEq>(predicted: &[Option<L>], expected: &[L]) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let hits = predicted
        .iter()
        .zip(expected)
        .filter(|(p, e)| p.as_ref() == Some(*e))
        .count();
    hits as f64 / expected.len() as f64
}

pub fn fit_category_model(texts: &[CleanText], labels: &[Category], vocabulary: &Vocabulary, options: &TrainingOptions) -> CategoryModel {
    let vectorizer = TfidfVectorizer::fit(texts, &vocabulary.stop_words, options.max_features);
    let rows: Vec<_> = texts.iter().map(|text| vectorizer.transform(text)).collect();
    let classifier = MultinomialNb::fit(&rows, labels, vectorizer.n_features(), options.smoothing);
    CategoryModel { vectorizer, classifier }
}

pub fn fit_priority_model(features: &[Vec<f64>], labels: &[UrgencyLabel], options: &TrainingOptions) -> PriorityModel {
    PriorityModel {
        forest: RandomForest::fit(features, labels, &options.forest),
    }
}

/// Trains both models and replaces the ones in `models_dir`.
pub fn train_models(
    samples: &[TrainingSample],
    vocabulary: &Vocabulary,
    models_dir: &Path,
    options: &TrainingOptions,
) -> Result<TrainingReport> {
    if samples.len() < MIN_TRAINING_SAMPLES {
        return Err(Error::InsufficientData {
            found: samples.len(),
            required: MIN_TRAINING_SAMPLES,
        });
    }

    let texts: Vec<CleanText> = samples
        .iter()
        .map(|sample| text::combine(&sample.title, &sample.description))
        .collect();
    let features: Vec<Vec<f64>> = samples
        .iter()
        .zip(&texts)
        .map(|(sample, text)| urgency_features(vocabulary, text, sample.category))
        .collect();

    let (train, test) = split_indices(samples.len(), options.test_fraction, options.seed);
    let pick = |indices: &[usize]| -> (Vec<CleanText>, Vec<Vec<f64>>, Vec<Category>, Vec<UrgencyLabel>) {
        (
            indices.iter().map(|&i| texts[i].clone()).collect(),
            indices.iter().map(|&i| features[i].clone()).collect(),
            indices.iter().map(|&i| samples[i].category).collect(),
            indices.iter().map(|&i| samples[i].priority).collect(),
        )
    };
    let (train_texts, train_features, train_categories, train_priorities) = pick(&train);
    let (test_texts, test_features, test_categories, test_priorities) = pick(&test);

    let category_model = fit_category_model(&train_texts, &train_categories, vocabulary, options);
    let category_predictions: Vec<Option<Category>> = test_texts
        .iter()
        .map(|text| {
            category_model
                .classifier
                .predict(&category_model.vectorizer.transform(text))
                .map(|(label, _)| label)
        })
        .collect();
    let category_accuracy = accuracy(&category_predictions, &test_categories);
    info!(accuracy = category_accuracy, train = train.len(), test = test.len(), "category model trained");

    let priority_model = fit_priority_model(&train_features, &train_priorities, options);
    let priority_predictions: Vec<Option<UrgencyLabel>> = test_features
        .iter()
        .map(|row| priority_model.forest.predict(row).map(|(label, _)| label))
        .collect();
    let priority_accuracy = accuracy(&priority_predictions, &test_priorities);
    info!(accuracy = priority_accuracy, train = train.len(), test = test.len(), "priority model trained");

    fs::create_dir_all(models_dir)?;
    let trained_at = now_rfc3339();

    // both files are fully written before either replaces its predecessor
    let category_tmp = stage_model(
        models_dir,
        &ModelFile {
            format_version: MODEL_FORMAT_VERSION,
            trained_at: trained_at.clone(),
            samples: train.len(),
            accuracy: category_accuracy,
            model: category_model,
        },
    )?;
    let priority_tmp = stage_model(
        models_dir,
        &ModelFile {
            format_version: MODEL_FORMAT_VERSION,
            trained_at,
            samples: train.len(),
            accuracy: priority_accuracy,
            model: priority_model,
        },
    )?;

    let category_model_path = models_dir.join(CATEGORY_MODEL_FILE);
    let priority_model_path = models_dir.join(PRIORITY_MODEL_FILE);
    let previous_category = match fs::read(&category_model_path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    category_tmp.persist(&category_model_path).map_err(|err| Error::Io(err.error))?;
    if let Err(err) = priority_tmp.persist(&priority_model_path) {
        let error = err.error;
        warn!(error = %error, "priority model could not be replaced, restoring the category model");
        restore_model(models_dir, &category_model_path, previous_category)?;
        return Err(Error::Io(error));
    }

    Ok(TrainingReport {
        samples: samples.len(),
        train_size: train.len(),
        test_size: test.len(),
        category_accuracy,
        priority_accuracy,
        category_model_path,
        priority_model_path,
    })
}

/// Serialises a model into a synced temp file inside `dir`, ready to be renamed.
fn stage_model<M: Serialize>(dir: &Path, file: &ModelFile<M>) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut tmp, file)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Puts back the bytes a model file held before this run, or removes it if there were none.
fn restore_model(dir: &Path, path: &Path, previous: Option<Vec<u8>>) -> Result<()> {
    match previous {
        Some(bytes) => {
            let mut tmp = NamedTempFile::new_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(path).map_err(|err| Error::Io(err.error))?;
        }
        None => fs::remove_file(path)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_deterministic_and_disjoint() {
        let (train_a, test_a) = split_indices(16, 0.2, 42);
        let (train_b, test_b) = split_indices(16, 0.2, 42);
        assert_eq!((train_a.clone(), test_a.clone()), (train_b, test_b));
        assert_eq!(test_a.len(), 4);
        assert_eq!(train_a.len(), 12);
        assert!(test_a.iter().all(|index| !train_a.contains(index)));
    }

    #[test]
    fn split_keeps_both_sides_non_empty() {
        let (train, test) = split_indices(10, 0.0, 1);
        assert_eq!(test.len(), 1);
        assert_eq!(train.len(), 9);
    }

    #[test]
    fn accuracy_counts_exact_hits() {
        let predicted = vec![Some(Category::Road), None, Some(Category::Water)];
        let expected = vec![Category::Road, Category::Road, Category::Road];
        assert!((accuracy(&predicted, &expected) - 1.0 / 3.0).abs() < 1e-12);
    }
}
