//! Multi-factor priority scoring.
//!
//! Five factor scores, each clamped to 0-10, are combined as a fixed weighted
//! sum and mapped to a [`PriorityLevel`]. The engine is pure: it never touches
//! the store, and the caller persists the returned [`PriorityBreakdown`].

use crate::geo::DuplicateReport;
use crate::rules::{PriorityRules, RuleSet};
use crate::schema::{Category, FactorScores, IssueSnapshot, PriorityBreakdown, PriorityLevel};
use crate::text::{self, CleanText};
use crate::timefmt::{format_rfc3339, parse_timestamp};
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct PriorityEngine {
    rules: Arc<RuleSet>,
}

impl PriorityEngine {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &PriorityRules {
        &self.rules.priority
    }

    pub fn calculate_overall_priority_score(
        &self,
        issue: &IssueSnapshot,
        duplicates: &DuplicateReport,
        now: OffsetDateTime,
    ) -> PriorityBreakdown {
        let rules = self.rules();
        let category = issue.category.unwrap_or(Category::Other);
        let text = text::combine(&issue.title, &issue.description);

        let factor_scores = FactorScores {
            severity: self.severity_score(
                category,
                &text,
                issue.citizen_vote_average,
                issue.ai_severity_score,
            ),
            location: self.location_score(&issue.address),
            reports_count: round_score(clamp_score(duplicates.score, 0.0, 10.0), 2),
            age: self.age_score(&issue.created_at, now),
            safety_impact: self.safety_impact_score(category, &text),
        };

        let weights = rules.weights.clone();
        let weighted = factor_scores.severity * weights.severity
            + factor_scores.location * weights.location
            + factor_scores.reports_count * weights.reports_count
            + factor_scores.age * weights.age
            + factor_scores.safety_impact * weights.safety_impact;

        let final_score = round_score(clamp_score(weighted, 0.0, 10.0), 2);

        PriorityBreakdown {
            final_score,
            priority_level: self.level_for(final_score),
            factor_scores,
            weights,
            duplicate_count: duplicates.duplicate_count,
            calculation_timestamp: format_rfc3339(now),
        }
    }

    /// Category base plus keyword adjustments, then citizen-vote and AI corrections.
    ///
    /// The vote average and AI score each pull the keyword-adjusted base toward
    /// themselves by their own weight, independently of one another.
    pub fn severity_score(
        &self,
        category: Category,
        text: &CleanText,
        citizen_vote_average: Option<f64>,
        ai_severity_score: Option<f64>,
    ) -> f64 {
        let rules = &self.rules().severity;

        let modifier = text.count_matches(&rules.high_keywords) as f64 * rules.high_keyword_bonus
            + text.count_matches(&rules.medium_keywords) as f64 * rules.medium_keyword_bonus
            - text.count_matches(&rules.low_keywords) as f64 * rules.low_keyword_penalty;

        let base = clamp_score(rules.base_for(category) + modifier, rules.floor, rules.ceiling);

        let mut correction = 0.0;
        if let Some(votes) = citizen_vote_average.filter(|v| v.is_finite()) {
            correction += rules.citizen_vote_weight * (clamp_score(votes, 1.0, 10.0) - base);
        }
        if let Some(ai) = ai_severity_score.filter(|v| v.is_finite()) {
            correction += rules.ai_score_weight * (clamp_score(ai, 0.0, 10.0) - base);
        }

        round_score(clamp_score(base + correction, rules.floor, rules.ceiling), 2)
    }

    /// Road type from the address, plus capped facility-proximity bonuses.
    pub fn location_score(&self, address: &str) -> f64 {
        let rules = &self.rules().location;
        let address = text::normalize(address);

        let road_score = rules
            .road_types
            .iter()
            .find(|road| address.contains_any(&road.keywords))
            .map(|road| road.score)
            .unwrap_or(rules.default_road_score);

        round_score(
            clamp_score(road_score + self.facility_bonus(&address), 0.0, rules.ceiling),
            2,
        )
    }

    pub fn facility_bonus(&self, address: &CleanText) -> f64 {
        let rules = &self.rules().location;
        let total: f64 = rules
            .facilities
            .iter()
            .filter(|facility| address.contains_any(&facility.keywords))
            .map(|facility| facility.bonus)
            .sum();
        total.min(rules.facility_bonus_cap)
    }

    /// Step function on whole days since creation; non-decreasing in `now`.
    ///
    /// An unparseable timestamp is treated as "just created" and a timestamp
    /// in the future as zero days old.
    pub fn age_score(&self, created_at: &str, now: OffsetDateTime) -> f64 {
        let rules = &self.rules().age;
        let age_days = parse_timestamp(created_at)
            .map(|created| (now - created).whole_days().max(0))
            .unwrap_or(0);

        rules
            .steps
            .iter()
            .find(|step| age_days <= step.max_days)
            .map(|step| step.score)
            .unwrap_or(rules.overflow_score)
    }

    pub fn safety_impact_score(&self, category: Category, text: &CleanText) -> f64 {
        let rules = &self.rules().safety;
        let modifier = text.count_matches(&rules.high_impact_keywords) as f64 * rules.high_impact_bonus
            + text.count_matches(&rules.economic_keywords) as f64 * rules.economic_bonus;

        let score = rules.neutral + modifier + rules.impact_for(category);
        round_score(clamp_score(score, rules.floor, rules.ceiling), 2)
    }

    /// Thresholds are inclusive lower bounds.
    pub fn level_for(&self, score: f64) -> PriorityLevel {
        let t = &self.rules().thresholds;
        if score >= t.critical {
            PriorityLevel::Critical
        } else if score >= t.high {
            PriorityLevel::High
        } else if score >= t.medium {
            PriorityLevel::Medium
        } else if score >= t.low {
            PriorityLevel::Low
        } else {
            PriorityLevel::VeryLow
        }
    }
}

fn clamp_score(value: f64, floor: f64, ceiling: f64) -> f64 {
    value.max(floor).min(ceiling)
}

fn round_score(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DuplicateDetector;
    use crate::rules::DuplicateRules;
    use crate::schema::Coordinates;
    use time::Duration;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-06-01 12:00 UTC);

    fn engine() -> PriorityEngine {
        PriorityEngine::new(Arc::new(RuleSet::default()))
    }

    fn report(count: usize) -> DuplicateReport {
        let detector = DuplicateDetector::new(DuplicateRules::default());
        DuplicateReport {
            score: detector.score_for_count(count),
            duplicate_count: count,
            duplicate_ids: Vec::new(),
        }
    }

    fn issue(title: &str, description: &str, category: Option<Category>, address: &str) -> IssueSnapshot {
        IssueSnapshot {
            id: "issue-1".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            category,
            coordinates: Some(Coordinates {
                latitude: 17.385,
                longitude: 78.4867,
            }),
            address: address.to_string(),
            created_at: format_rfc3339(NOW),
            ai_severity_score: None,
            citizen_vote_average: None,
        }
    }

    #[test]
    fn pothole_near_hospital_lands_high_or_critical() {
        let e = engine();
        let snapshot = issue(
            "Large pothole causing traffic, near City Hospital",
            "",
            Some(Category::Road),
            "Main Street near City Hospital",
        );
        let breakdown = e.calculate_overall_priority_score(&snapshot, &report(4), NOW);

        assert_eq!(breakdown.factor_scores.severity, 7.0);
        // "main" wins the road-type lookup before "street"
        assert_eq!(breakdown.factor_scores.location, 10.0);
        assert_eq!(breakdown.factor_scores.reports_count, 6.0);
        assert_eq!(breakdown.factor_scores.age, 2.0);
        // neutral 5.0 + traffic 1.5 + road 3.0
        assert_eq!(breakdown.factor_scores.safety_impact, 9.5);
        assert_eq!(breakdown.duplicate_count, 4);
        assert!(matches!(
            breakdown.priority_level,
            PriorityLevel::High | PriorityLevel::Critical
        ));
    }

    #[test]
    fn street_address_with_hospital_scores_nine() {
        assert_eq!(engine().location_score("12 Oak Street, opposite City Hospital"), 9.0);
    }

    #[test]
    fn facility_bonus_is_capped_in_total() {
        let e = engine();
        // hospital 3.0 + school 2.5 + mall 1.5, capped at 3.0
        let address = text::normalize("Hospital Road by the school and the mall");
        assert_eq!(e.facility_bonus(&address), 3.0);
        assert_eq!(e.location_score("Hospital Road by the school and the mall"), 9.0);
        assert_eq!(e.location_score("Expressway exit near the clinic"), 10.0);
    }

    #[test]
    fn unknown_address_uses_default_road_score() {
        assert_eq!(engine().location_score(""), 5.0);
        assert_eq!(engine().location_score("Private alley"), 2.0);
    }

    #[test]
    fn severity_keywords_adjust_and_clamp() {
        let e = engine();
        let low = text::combine("Minor cosmetic request", "small suggestion");
        assert_eq!(e.severity_score(Category::Sanitation, &low, None, None), 1.0);

        let high = text::combine("Emergency: burst pipe", "urgent flood, major leak");
        assert_eq!(e.severity_score(Category::Water, &high, None, None), 10.0);
    }

    #[test]
    fn votes_and_ai_are_independent_corrections() {
        let e = engine();
        let text = text::combine("Pothole", "");
        // base 7.0; votes pull +0.3 * (10 - 7); ai pulls +0.2 * (2 - 7)
        let score = e.severity_score(Category::Road, &text, Some(10.0), Some(2.0));
        assert_eq!(score, 6.9);

        let only_votes = e.severity_score(Category::Road, &text, Some(10.0), None);
        assert_eq!(only_votes, 7.9);
    }

    #[test]
    fn missing_category_scores_as_other() {
        let e = engine();
        let with_none = e.calculate_overall_priority_score(&issue("Bench", "", None, ""), &report(0), NOW);
        let with_other =
            e.calculate_overall_priority_score(&issue("Bench", "", Some(Category::Other), ""), &report(0), NOW);
        assert_eq!(with_none.factor_scores, with_other.factor_scores);
    }

    #[test]
    fn age_steps_are_monotonic() {
        let e = engine();
        let created = format_rfc3339(NOW);
        let mut previous = 0.0;
        for days in [0, 1, 2, 7, 8, 30, 31, 90, 91, 180, 181, 1000] {
            let score = e.age_score(&created, NOW + Duration::days(days));
            assert!(score >= previous, "age score dropped at {days} days");
            previous = score;
        }
        assert_eq!(e.age_score(&created, NOW + Duration::days(1)), 2.0);
        assert_eq!(e.age_score(&created, NOW + Duration::days(2)), 3.0);
        assert_eq!(e.age_score(&created, NOW + Duration::days(181)), 10.0);
    }

    #[test]
    fn unparseable_or_future_timestamps_are_fresh() {
        let e = engine();
        assert_eq!(e.age_score("not a date", NOW), 2.0);
        assert_eq!(e.age_score(&format_rfc3339(NOW + Duration::days(30)), NOW), 2.0);
    }

    #[test]
    fn level_thresholds_are_inclusive() {
        let e = engine();
        assert_eq!(e.level_for(8.0), PriorityLevel::Critical);
        assert_eq!(e.level_for(7.99), PriorityLevel::High);
        assert_eq!(e.level_for(6.5), PriorityLevel::High);
        assert_eq!(e.level_for(4.5), PriorityLevel::Medium);
        assert_eq!(e.level_for(2.5), PriorityLevel::Low);
        assert_eq!(e.level_for(2.49), PriorityLevel::VeryLow);
    }

    #[test]
    fn final_score_stays_in_range() {
        let e = engine();
        let worst = issue("", "", Some(Category::Sanitation), "");
        let best = issue(
            "Emergency accident fire, gas leak burst flood, severe major critical",
            "dangerous traffic hazard, business delivery truck",
            Some(Category::Electricity),
            "Highway by the hospital",
        );
        for (snapshot, count) in [(worst, 0), (best, 50)] {
            let breakdown = e.calculate_overall_priority_score(&snapshot, &report(count), NOW + Duration::days(400));
            assert!((0.0..=10.0).contains(&breakdown.final_score));
        }
    }

    #[test]
    fn breakdown_records_weights_and_timestamp() {
        let breakdown =
            engine().calculate_overall_priority_score(&issue("Bench", "", None, ""), &report(0), NOW);
        assert_eq!(breakdown.weights, crate::schema::FactorWeights::default());
        assert_eq!(breakdown.calculation_timestamp, "2025-06-01T12:00:00Z");
    }
}
