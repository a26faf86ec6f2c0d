//! Advisory category and urgency classification.
//!
//! Each predictor is a two-variant strategy: a trained model loaded from disk,
//! or deterministic keyword counting. The variant is picked once when the
//! [`IssueClassifier`] is built. Predictions never fail; a trained model that
//! has no signal for an input defers to the rule-based path.

pub mod bayes;
pub mod features;
pub mod forest;

use crate::rules::{RuleSet, Vocabulary};
use crate::schema::{
    Category, IssuePredictions, Prediction, PredictionExplanation, PredictionMethod, UrgencyLabel,
};
use crate::text::{self, CleanText};
use crate::timefmt::now_rfc3339;
use crate::{Error, Result};
use bayes::{MultinomialNb, TfidfVectorizer};
use forest::RandomForest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const CATEGORY_MODEL_FILE: &str = "category_model.json";
pub const PRIORITY_MODEL_FILE: &str = "priority_model.json";
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Confidence reported when the input carries no usable signal.
pub const NO_SIGNAL_CONFIDENCE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryModel {
    pub vectorizer: TfidfVectorizer,
    pub classifier: MultinomialNb<Category>,
}

impl CategoryModel {
    fn predict(&self, text: &CleanText) -> Option<(Category, f64)> {
        let row = self.vectorizer.transform(text);
        if row.is_empty() {
            return None;
        }
        self.classifier.predict(&row)
    }

    /// Rejects a model whose parts disagree, so predictions cannot index out of range.
    pub fn check(&self) -> Result<()> {
        self.vectorizer.check()?;
        self.classifier.check(self.vectorizer.n_features())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityModel {
    pub forest: RandomForest<UrgencyLabel>,
}

impl PriorityModel {
    fn predict(&self, features: &[f64]) -> Option<(UrgencyLabel, f64)> {
        self.forest.predict(features)
    }

    pub fn check(&self) -> Result<()> {
        if self.forest.n_features() != features::URGENCY_FEATURE_NAMES.len() {
            return Err(Error::ModelUnavailable(format!(
                "priority model expects {} features, extractor produces {}",
                self.forest.n_features(),
                features::URGENCY_FEATURE_NAMES.len()
            )));
        }
        self.forest.check()
    }
}

/// On-disk envelope for a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile<M> {
    pub format_version: u32,
    pub trained_at: String,
    pub samples: usize,
    pub accuracy: f64,
    pub model: M,
}

pub fn read_model<M: for<'de> Deserialize<'de>>(path: &Path) -> Result<ModelFile<M>> {
    let raw = fs::read_to_string(path)
        .map_err(|err| Error::ModelUnavailable(format!("{}: {err}", path.display())))?;
    let file: ModelFile<M> = serde_json::from_str(&raw)
        .map_err(|err| Error::ModelUnavailable(format!("{}: {err}", path.display())))?;
    if file.format_version != MODEL_FORMAT_VERSION {
        return Err(Error::ModelUnavailable(format!(
            "{}: unsupported format version {}",
            path.display(),
            file.format_version
        )));
    }
    Ok(file)
}

/// Input shared by both predictors.
pub struct PredictionInput<'a> {
    pub text: &'a CleanText,
    pub category: Category,
}

pub trait Predictor {
    type Label;

    fn predict(&self, input: &PredictionInput<'_>) -> Prediction<Self::Label>;
}

#[derive(Debug, Clone)]
pub enum CategoryPredictor {
    Trained {
        model: CategoryModel,
        rules: Arc<RuleSet>,
    },
    RuleBased {
        rules: Arc<RuleSet>,
    },
}

#[derive(Debug, Clone)]
pub enum PriorityPredictor {
    Trained {
        model: PriorityModel,
        rules: Arc<RuleSet>,
    },
    RuleBased {
        rules: Arc<RuleSet>,
    },
}

impl CategoryPredictor {
    fn vocabulary(&self) -> &Vocabulary {
        match self {
            Self::Trained { rules, .. } | Self::RuleBased { rules } => &rules.vocabulary,
        }
    }

    pub fn method(&self) -> PredictionMethod {
        match self {
            Self::Trained { .. } => PredictionMethod::MlModel,
            Self::RuleBased { .. } => PredictionMethod::RuleBased,
        }
    }
}

impl Predictor for CategoryPredictor {
    type Label = Category;

    fn predict(&self, input: &PredictionInput<'_>) -> Prediction<Category> {
        if let Self::Trained { model, .. } = self {
            if let Some((label, confidence)) = model.predict(input.text) {
                return Prediction {
                    label,
                    confidence,
                    method: PredictionMethod::MlModel,
                };
            }
        }
        rule_based_category(self.vocabulary(), input.text)
    }
}

impl PriorityPredictor {
    fn vocabulary(&self) -> &Vocabulary {
        match self {
            Self::Trained { rules, .. } | Self::RuleBased { rules } => &rules.vocabulary,
        }
    }

    pub fn method(&self) -> PredictionMethod {
        match self {
            Self::Trained { .. } => PredictionMethod::MlModel,
            Self::RuleBased { .. } => PredictionMethod::RuleBased,
        }
    }
}

impl Predictor for PriorityPredictor {
    type Label = UrgencyLabel;

    fn predict(&self, input: &PredictionInput<'_>) -> Prediction<UrgencyLabel> {
        if let Self::Trained { model, .. } = self {
            if !input.text.is_empty() {
                let row = features::urgency_features(self.vocabulary(), input.text, input.category);
                if let Some((label, confidence)) = model.predict(&row) {
                    return Prediction {
                        label,
                        confidence,
                        method: PredictionMethod::MlModel,
                    };
                }
            }
        }
        rule_based_priority(self.vocabulary(), input.text)
    }
}

/// Highest keyword count wins, ties going to the earlier category.
fn rule_based_category(vocabulary: &Vocabulary, text: &CleanText) -> Prediction<Category> {
    let scores: Vec<(Category, usize)> = vocabulary
        .category_keywords
        .iter()
        .map(|(category, keywords)| (*category, text.count_matches(keywords)))
        .collect();
    let total: usize = scores.iter().map(|(_, count)| count).sum();

    let best = scores
        .iter()
        .fold(None, |best: Option<(Category, usize)>, &(category, count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((category, count)),
        });

    match best {
        Some((label, count)) if count > 0 => Prediction {
            label,
            confidence: count as f64 / total as f64,
            method: PredictionMethod::RuleBased,
        },
        _ => Prediction {
            label: Category::Other,
            confidence: NO_SIGNAL_CONFIDENCE,
            method: PredictionMethod::RuleBased,
        },
    }
}

/// First tier hit among critical, high, then low; medium otherwise.
fn rule_based_priority(vocabulary: &Vocabulary, text: &CleanText) -> Prediction<UrgencyLabel> {
    let rule = |label, confidence| Prediction {
        label,
        confidence,
        method: PredictionMethod::RuleBased,
    };

    if text.is_empty() {
        return rule(UrgencyLabel::Medium, NO_SIGNAL_CONFIDENCE);
    }
    if text.contains_any(vocabulary.urgency(UrgencyLabel::Critical)) {
        return rule(UrgencyLabel::Critical, 0.9);
    }
    if text.contains_any(vocabulary.urgency(UrgencyLabel::High)) {
        return rule(UrgencyLabel::High, 0.8);
    }
    if text.contains_any(vocabulary.urgency(UrgencyLabel::Low)) {
        return rule(UrgencyLabel::Low, 0.7);
    }
    rule(UrgencyLabel::Medium, 0.6)
}

#[derive(Debug, Clone)]
pub struct IssueClassifier {
    rules: Arc<RuleSet>,
    category: CategoryPredictor,
    priority: PriorityPredictor,
}

impl IssueClassifier {
    pub fn rule_based(rules: Arc<RuleSet>) -> Self {
        Self::with_models(rules, None, None)
    }

    pub fn with_models(
        rules: Arc<RuleSet>,
        category_model: Option<CategoryModel>,
        priority_model: Option<PriorityModel>,
    ) -> Self {
        let category = match category_model {
            Some(model) => CategoryPredictor::Trained {
                model,
                rules: rules.clone(),
            },
            None => CategoryPredictor::RuleBased {
                rules: rules.clone(),
            },
        };
        let priority = match priority_model {
            Some(model) => PriorityPredictor::Trained {
                model,
                rules: rules.clone(),
            },
            None => PriorityPredictor::RuleBased {
                rules: rules.clone(),
            },
        };
        Self {
            rules,
            category,
            priority,
        }
    }

    /// Loads whichever trained models exist in `models_dir`; anything missing or
    /// unreadable is logged and replaced by the rule-based strategy.
    pub fn load(models_dir: &Path, rules: Arc<RuleSet>) -> Self {
        let category_path = models_dir.join(CATEGORY_MODEL_FILE);
        let category_model = match read_model::<CategoryModel>(&category_path).and_then(|file| file.model.check().map(|()| file)) {
            Ok(file) => {
                info!(accuracy = file.accuracy, samples = file.samples, "category model loaded");
                Some(file.model)
            }
            Err(err) => {
                warn!(path = %category_path.display(), error = %err, "category model unavailable, using rule-based classification");
                None
            }
        };
        let priority_path = models_dir.join(PRIORITY_MODEL_FILE);
        let priority_model = match read_model::<PriorityModel>(&priority_path).and_then(|file| file.model.check().map(|()| file)) {
            Ok(file) => {
                info!(accuracy = file.accuracy, samples = file.samples, "priority model loaded");
                Some(file.model)
            }
            Err(err) => {
                warn!(path = %priority_path.display(), error = %err, "priority model unavailable, using rule-based priority");
                None
            }
        };
        Self::with_models(rules, category_model, priority_model)
    }

    pub fn category_method(&self) -> PredictionMethod {
        self.category.method()
    }

    pub fn priority_method(&self) -> PredictionMethod {
        self.priority.method()
    }

    pub fn predict_category(&self, title: &str, description: &str) -> Prediction<Category> {
        let text = text::combine(title, description);
        self.category.predict(&PredictionInput {
            text: &text,
            category: Category::Other,
        })
    }

    pub fn predict_priority(&self, title: &str, description: &str, category: Category) -> Prediction<UrgencyLabel> {
        let text = text::combine(title, description);
        self.priority.predict(&PredictionInput {
            text: &text,
            category,
        })
    }

    /// Category (unless provided) and priority, with the keywords behind them.
    pub fn get_predictions(&self, title: &str, description: &str, category: Option<Category>) -> IssuePredictions {
        let category = match category {
            Some(label) => Prediction {
                label,
                confidence: 1.0,
                method: PredictionMethod::Provided,
            },
            None => self.predict_category(title, description),
        };
        let priority = self.predict_priority(title, description, category.label);

        IssuePredictions {
            explanation: self.explain(title, description),
            category,
            priority,
            timestamp: now_rfc3339(),
        }
    }

    /// Up to three matched keywords per category and urgency tier.
    pub fn explain(&self, title: &str, description: &str) -> PredictionExplanation {
        let text = text::combine(title, description);
        let vocabulary = &self.rules.vocabulary;

        let category_reasoning = vocabulary
            .category_keywords
            .iter()
            .filter_map(|(category, keywords)| {
                let found = text.matches(keywords);
                (!found.is_empty()).then(|| format!("Found {category} keywords: {}", first_three(&found)))
            })
            .collect();

        let priority_reasoning = UrgencyLabel::ALL
            .iter()
            .filter_map(|label| {
                let found = text.matches(vocabulary.urgency(*label));
                (!found.is_empty())
                    .then(|| format!("Found {label} urgency indicators: {}", first_three(&found)))
            })
            .collect();

        PredictionExplanation {
            category_reasoning,
            priority_reasoning,
        }
    }
}

fn first_three(found: &[&str]) -> String {
    found.iter().take(3).copied().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IssueClassifier {
        IssueClassifier::rule_based(Arc::new(RuleSet::default()))
    }

    #[test]
    fn empty_text_yields_low_confidence_defaults() {
        let c = classifier();
        let category = c.predict_category("", "");
        assert_eq!(category.label, Category::Other);
        assert!(category.confidence <= NO_SIGNAL_CONFIDENCE);
        assert_eq!(category.method, PredictionMethod::RuleBased);

        let priority = c.predict_priority("", "", Category::Other);
        assert_eq!(priority.label, UrgencyLabel::Medium);
        assert!(priority.confidence <= NO_SIGNAL_CONFIDENCE);
    }

    #[test]
    fn rule_based_category_uses_keyword_share() {
        let prediction = classifier().predict_category("Water pipe leak", "burst pipe near the road");
        assert_eq!(prediction.label, Category::Water);
        // water: water, leak, pipe, burst; road: road
        assert!((prediction.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn rule_based_priority_checks_tiers_in_order() {
        let c = classifier();
        assert_eq!(c.predict_priority("Fire near the pole", "", Category::Electricity).label, UrgencyLabel::Critical);
        assert_eq!(c.predict_priority("Broken bench", "", Category::Other).label, UrgencyLabel::High);
        assert_eq!(c.predict_priority("Minor paint peeling", "", Category::Other).label, UrgencyLabel::Low);
        assert_eq!(c.predict_priority("Bench paint", "", Category::Other).label, UrgencyLabel::Medium);
    }

    #[test]
    fn provided_category_is_passed_through() {
        let predictions = classifier().get_predictions("Streetlight out", "dark since monday", Some(Category::Road));
        assert_eq!(predictions.category.method, PredictionMethod::Provided);
        assert_eq!(predictions.category.confidence, 1.0);
        assert_eq!(predictions.category.label, Category::Road);
    }

    #[test]
    fn explanation_lists_matched_keywords() {
        let explanation = classifier().explain("Streetlight out", "power outage, dangerous at night");
        assert!(explanation
            .category_reasoning
            .iter()
            .any(|line| line.starts_with("Found electricity keywords: light, power, outage")));
        assert!(explanation
            .priority_reasoning
            .iter()
            .any(|line| line == "Found critical urgency indicators: dangerous"));
    }

    #[test]
    fn missing_models_fall_back_to_rules() {
        let dir = tempfile::tempdir().unwrap();
        let c = IssueClassifier::load(dir.path(), Arc::new(RuleSet::default()));
        assert_eq!(c.category_method(), PredictionMethod::RuleBased);
        assert_eq!(c.priority_method(), PredictionMethod::RuleBased);
    }

    #[test]
    fn corrupt_model_file_falls_back_to_rules() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CATEGORY_MODEL_FILE), "{ not json").unwrap();
        let c = IssueClassifier::load(dir.path(), Arc::new(RuleSet::default()));
        assert_eq!(c.category_method(), PredictionMethod::RuleBased);
        assert!(matches!(
            read_model::<CategoryModel>(&dir.path().join(CATEGORY_MODEL_FILE)),
            Err(Error::ModelUnavailable(_))
        ));
    }
}
