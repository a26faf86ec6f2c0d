use crate::rules::Vocabulary;
use crate::schema::{Category, UrgencyLabel};
use crate::text::CleanText;

pub const URGENCY_FEATURE_NAMES: [&str; 8] = [
    "critical_keywords",
    "high_keywords",
    "medium_keywords",
    "low_keywords",
    "text_length",
    "word_count",
    "category_urgency",
    "time_mentioned",
];

/// Fixed-width urgency feature vector, in [`URGENCY_FEATURE_NAMES`] order.
pub fn urgency_features(vocabulary: &Vocabulary, text: &CleanText, category: Category) -> Vec<f64> {
    let tier = |label: UrgencyLabel| text.count_matches(vocabulary.urgency(label)) as f64;
    let category_urgency = vocabulary
        .category_urgency
        .get(&category)
        .map(|keywords| text.count_matches(keywords))
        .unwrap_or(0);
    let time_mentioned = text.contains_any(&vocabulary.time_phrases);

    vec![
        tier(UrgencyLabel::Critical),
        tier(UrgencyLabel::High),
        tier(UrgencyLabel::Medium),
        tier(UrgencyLabel::Low),
        text.text.len() as f64,
        text.word_count as f64,
        category_urgency as f64,
        if time_mentioned { 1.0 } else { 0.0 },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::combine;

    #[test]
    fn features_have_fixed_width_for_every_category() {
        let vocabulary = Vocabulary::default();
        let text = combine("Streetlight out", "dark for three days");
        for category in Category::ALL {
            assert_eq!(urgency_features(&vocabulary, &text, category).len(), URGENCY_FEATURE_NAMES.len());
        }
    }

    #[test]
    fn counts_tiers_and_indicators() {
        let vocabulary = Vocabulary::default();
        let text = combine("Emergency: burst main", "flooding the street since yesterday, major leak");
        let features = urgency_features(&vocabulary, &text, Category::Water);
        assert_eq!(features[0], 1.0); // emergency
        assert_eq!(features[1], 2.0); // major, leak
        assert_eq!(features[6], 3.0); // flooding, burst, leak
        assert_eq!(features[7], 1.0);
    }
}
