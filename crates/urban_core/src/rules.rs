//! Immutable scoring and classification tables.
//!
//! A [`RuleSet`] is either the compiled-in default or loaded from a directory
//! holding `priority_config.toml` and `keywords.yaml`. It is built once and
//! shared behind an `Arc`; nothing mutates it afterwards.

use crate::schema::{Category, FactorWeights, UrgencyLabel};
use crate::text::{english_stop_words, normalize_keywords};
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

pub const PRIORITY_CONFIG_FILE: &str = "priority_config.toml";
pub const KEYWORDS_FILE: &str = "keywords.yaml";

#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub priority: PriorityRules,
    pub vocabulary: Vocabulary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityRules {
    pub weights: FactorWeights,
    pub thresholds: LevelThresholds,
    pub severity: SeverityRules,
    pub location: LocationRules,
    pub duplicates: DuplicateRules,
    pub age: AgeRules,
    pub safety: SafetyRules,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LevelThresholds {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeverityRules {
    pub category_base: BTreeMap<Category, f64>,
    pub default_base: f64,
    pub high_keywords: Vec<String>,
    pub medium_keywords: Vec<String>,
    pub low_keywords: Vec<String>,
    pub high_keyword_bonus: f64,
    pub medium_keyword_bonus: f64,
    pub low_keyword_penalty: f64,
    pub citizen_vote_weight: f64,
    pub ai_score_weight: f64,
    pub floor: f64,
    pub ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoadType {
    pub score: f64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Facility {
    pub name: String,
    pub bonus: f64,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationRules {
    /// Checked in order; the first road type with a matching keyword wins.
    pub road_types: Vec<RoadType>,
    pub default_road_score: f64,
    pub facilities: Vec<Facility>,
    /// Cap on the summed facility bonuses, not on each one.
    pub facility_bonus_cap: f64,
    pub ceiling: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CountStep {
    pub max_count: usize,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DuplicateRules {
    pub radius_meters: f64,
    pub steps: Vec<CountStep>,
    pub overflow_score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgeStep {
    pub max_days: i64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgeRules {
    pub steps: Vec<AgeStep>,
    pub overflow_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyRules {
    pub neutral: f64,
    pub category_impact: BTreeMap<Category, f64>,
    pub default_impact: f64,
    pub high_impact_keywords: Vec<String>,
    pub economic_keywords: Vec<String>,
    pub high_impact_bonus: f64,
    pub economic_bonus: f64,
    pub floor: f64,
    pub ceiling: f64,
}

/// Keyword tables used by the rule-based classifiers and the urgency features.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    pub category_keywords: BTreeMap<Category, Vec<String>>,
    pub urgency_keywords: BTreeMap<UrgencyLabel, Vec<String>>,
    pub category_urgency: BTreeMap<Category, Vec<String>>,
    pub time_phrases: Vec<String>,
    pub stop_words: HashSet<String>,
}

impl Vocabulary {
    pub fn urgency(&self, label: UrgencyLabel) -> &[String] {
        self.urgency_keywords
            .get(&label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl SeverityRules {
    pub fn base_for(&self, category: Category) -> f64 {
        self.category_base
            .get(&category)
            .copied()
            .unwrap_or(self.default_base)
    }
}

impl SafetyRules {
    pub fn impact_for(&self, category: Category) -> f64 {
        self.category_impact
            .get(&category)
            .copied()
            .unwrap_or(self.default_impact)
    }
}

// ---------------------------------------------------------------------------
// On-disk shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct PriorityConfigFile {
    weights: FactorWeights,
    thresholds: LevelThresholds,
    severity: SeverityConfig,
    location: LocationRules,
    duplicates: DuplicateRules,
    age: AgeRules,
    safety: SafetyConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct SeverityConfig {
    category_base: BTreeMap<String, f64>,
    default_base: f64,
    high_keyword_bonus: f64,
    medium_keyword_bonus: f64,
    low_keyword_penalty: f64,
    citizen_vote_weight: f64,
    ai_score_weight: f64,
    floor: f64,
    ceiling: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct SafetyConfig {
    neutral: f64,
    category_impact: BTreeMap<String, f64>,
    default_impact: f64,
    high_impact_bonus: f64,
    economic_bonus: f64,
    floor: f64,
    ceiling: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct KeywordsFile {
    severity: SeverityKeywords,
    safety: SafetyKeywords,
    categories: BTreeMap<String, Vec<String>>,
    urgency: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    category_urgency: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    time_phrases: Vec<String>,
    stop_words: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SeverityKeywords {
    high: Vec<String>,
    medium: Vec<String>,
    low: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SafetyKeywords {
    high_impact: Vec<String>,
    economic: Vec<String>,
}

impl RuleSet {
    pub fn load_from_dir(path: &Path) -> Result<Self> {
        let config_path = path.join(PRIORITY_CONFIG_FILE);
        let config_str = fs::read_to_string(&config_path)?;
        let config: PriorityConfigFile = toml::from_str(&config_str)
            .map_err(|err| Error::Config(format!("{}: {err}", config_path.display())))?;

        let keywords_path = path.join(KEYWORDS_FILE);
        let keywords_str = fs::read_to_string(&keywords_path)?;
        let keywords: KeywordsFile = serde_yaml::from_str(&keywords_str)
            .map_err(|err| Error::Config(format!("{}: {err}", keywords_path.display())))?;

        let rules = Self {
            priority: parse_priority_rules(config, &keywords)?,
            vocabulary: parse_vocabulary(&keywords)?,
        };
        rules.validate()?;
        Ok(rules)
    }

    /// Loads from `dir` when given, otherwise the compiled-in defaults.
    pub fn load_or_default(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::load_from_dir(dir),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let total = self.priority.weights.total();
        if (total - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!("factor weights sum to {total}, expected 1.0")));
        }

        let t = &self.priority.thresholds;
        if !(t.critical > t.high && t.high > t.medium && t.medium > t.low) {
            return Err(Error::Config(
                "level thresholds must be strictly descending from critical to low".to_string(),
            ));
        }

        if self.priority.duplicates.radius_meters <= 0.0 {
            return Err(Error::Config("duplicate radius must be positive".to_string()));
        }

        let counts = &self.priority.duplicates.steps;
        if counts.windows(2).any(|pair| pair[0].max_count >= pair[1].max_count) {
            return Err(Error::Config("duplicate steps must be ascending".to_string()));
        }

        let ages = &self.priority.age.steps;
        if ages.windows(2).any(|pair| pair[0].max_days >= pair[1].max_days || pair[0].score > pair[1].score) {
            return Err(Error::Config(
                "age steps must be ascending in days and non-decreasing in score".to_string(),
            ));
        }
        if ages.last().is_some_and(|step| step.score > self.priority.age.overflow_score) {
            return Err(Error::Config("age overflow score must not be below the last step".to_string()));
        }

        Ok(())
    }
}

fn parse_priority_rules(config: PriorityConfigFile, keywords: &KeywordsFile) -> Result<PriorityRules> {
    let severity = SeverityRules {
        category_base: parse_category_table(&config.severity.category_base)?,
        default_base: config.severity.default_base,
        high_keywords: normalize_keywords(&keywords.severity.high),
        medium_keywords: normalize_keywords(&keywords.severity.medium),
        low_keywords: normalize_keywords(&keywords.severity.low),
        high_keyword_bonus: config.severity.high_keyword_bonus,
        medium_keyword_bonus: config.severity.medium_keyword_bonus,
        low_keyword_penalty: config.severity.low_keyword_penalty,
        citizen_vote_weight: config.severity.citizen_vote_weight,
        ai_score_weight: config.severity.ai_score_weight,
        floor: config.severity.floor,
        ceiling: config.severity.ceiling,
    };

    let safety = SafetyRules {
        neutral: config.safety.neutral,
        category_impact: parse_category_table(&config.safety.category_impact)?,
        default_impact: config.safety.default_impact,
        high_impact_keywords: normalize_keywords(&keywords.safety.high_impact),
        economic_keywords: normalize_keywords(&keywords.safety.economic),
        high_impact_bonus: config.safety.high_impact_bonus,
        economic_bonus: config.safety.economic_bonus,
        floor: config.safety.floor,
        ceiling: config.safety.ceiling,
    };

    let mut location = config.location;
    for road in &mut location.road_types {
        road.keywords = normalize_keywords(&road.keywords);
    }
    for facility in &mut location.facilities {
        facility.keywords = normalize_keywords(&facility.keywords);
    }

    Ok(PriorityRules {
        weights: config.weights,
        thresholds: config.thresholds,
        severity,
        location,
        duplicates: config.duplicates,
        age: config.age,
        safety,
    })
}

fn parse_vocabulary(file: &KeywordsFile) -> Result<Vocabulary> {
    let mut category_keywords = BTreeMap::new();
    for (name, words) in &file.categories {
        category_keywords.insert(parse_category(name)?, normalize_keywords(words));
    }

    let mut urgency_keywords = BTreeMap::new();
    for (name, words) in &file.urgency {
        let label: UrgencyLabel = name.parse().map_err(Error::Config)?;
        urgency_keywords.insert(label, normalize_keywords(words));
    }

    let mut category_urgency = BTreeMap::new();
    for (name, words) in &file.category_urgency {
        category_urgency.insert(parse_category(name)?, normalize_keywords(words));
    }

    let stop_words = match &file.stop_words {
        Some(words) => words.iter().map(|word| word.to_lowercase()).collect(),
        None => english_stop_words(),
    };

    Ok(Vocabulary {
        category_keywords,
        urgency_keywords,
        category_urgency,
        time_phrases: normalize_keywords(&file.time_phrases),
        stop_words,
    })
}

fn parse_category(name: &str) -> Result<Category> {
    name.parse().map_err(Error::Config)
}

fn parse_category_table(table: &BTreeMap<String, f64>) -> Result<BTreeMap<Category, f64>> {
    let mut parsed = BTreeMap::new();
    for (name, value) in table {
        parsed.insert(parse_category(name)?, *value);
    }
    Ok(parsed)
}

// ---------------------------------------------------------------------------
// Compiled-in defaults (mirrored by config/ at the repository root)
// ---------------------------------------------------------------------------

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|word| word.to_string()).collect()
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            priority: PriorityRules::default(),
            vocabulary: Vocabulary::default(),
        }
    }
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            thresholds: LevelThresholds {
                critical: 8.0,
                high: 6.5,
                medium: 4.5,
                low: 2.5,
            },
            severity: SeverityRules::default(),
            location: LocationRules::default(),
            duplicates: DuplicateRules::default(),
            age: AgeRules::default(),
            safety: SafetyRules::default(),
        }
    }
}

impl Default for SeverityRules {
    fn default() -> Self {
        Self {
            category_base: BTreeMap::from([
                (Category::Electricity, 9.0),
                (Category::Water, 8.0),
                (Category::Road, 7.0),
                (Category::Transport, 6.0),
                (Category::Sanitation, 4.0),
                (Category::Other, 5.0),
            ]),
            default_base: 5.0,
            high_keywords: words(&[
                "emergency", "urgent", "danger", "accident", "broke", "burst", "flood", "fire",
                "electrical", "gas", "leak", "blocked", "collapsed", "severe", "major", "critical",
            ]),
            medium_keywords: words(&[
                "damage", "problem", "issue", "concern", "repair", "fix", "maintenance", "replace",
                "broken",
            ]),
            low_keywords: words(&[
                "minor", "small", "slight", "cosmetic", "aesthetic", "request", "suggestion",
                "improvement",
            ]),
            high_keyword_bonus: 2.0,
            medium_keyword_bonus: 0.5,
            low_keyword_penalty: 1.0,
            citizen_vote_weight: 0.3,
            ai_score_weight: 0.2,
            floor: 1.0,
            ceiling: 10.0,
        }
    }
}

impl Default for LocationRules {
    fn default() -> Self {
        let road = |score: f64, list: &[&str]| RoadType {
            score,
            keywords: words(list),
        };
        let facility = |name: &str, bonus: f64, list: &[&str]| Facility {
            name: name.to_string(),
            bonus,
            keywords: words(list),
        };
        Self {
            road_types: vec![
                road(10.0, &["highway", "expressway", "freeway"]),
                road(8.0, &["main", "avenue", "boulevard"]),
                road(6.0, &["street", "road", "drive"]),
                road(4.0, &["lane", "circle", "court"]),
                road(2.0, &["private", "alley"]),
            ],
            default_road_score: 5.0,
            facilities: vec![
                facility("hospital", 3.0, &["hospital", "medical", "clinic"]),
                facility("school", 2.5, &["school", "college", "university", "education"]),
                facility("emergency_services", 3.0, &["police", "fire station", "emergency"]),
                facility("public_transport", 2.0, &["bus stop", "metro", "station", "transport"]),
                facility("shopping_center", 1.5, &["mall", "market", "shopping", "commercial"]),
                facility("government_building", 1.8, &["government", "municipal", "office", "admin"]),
            ],
            facility_bonus_cap: 3.0,
            ceiling: 10.0,
        }
    }
}

impl Default for DuplicateRules {
    fn default() -> Self {
        let step = |max_count: usize, score: f64| CountStep { max_count, score };
        Self {
            radius_meters: 100.0,
            steps: vec![step(0, 1.0), step(2, 3.0), step(5, 6.0), step(10, 8.0)],
            overflow_score: 10.0,
        }
    }
}

impl Default for AgeRules {
    fn default() -> Self {
        let step = |max_days: i64, score: f64| AgeStep { max_days, score };
        Self {
            steps: vec![
                step(1, 2.0),
                step(7, 3.0),
                step(30, 5.0),
                step(90, 7.0),
                step(180, 8.5),
            ],
            overflow_score: 10.0,
        }
    }
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            neutral: 5.0,
            category_impact: BTreeMap::from([
                (Category::Electricity, 4.0),
                (Category::Water, 3.5),
                (Category::Road, 3.0),
                (Category::Transport, 3.0),
                (Category::Sanitation, 1.0),
                (Category::Other, 2.0),
            ]),
            default_impact: 2.0,
            high_impact_keywords: words(&[
                "accident", "traffic", "block", "congestion", "jam", "dangerous", "hazard",
                "unsafe", "risk", "injury", "emergency", "ambulance", "fire truck", "police",
            ]),
            economic_keywords: words(&[
                "business", "commerce", "shop", "delivery", "truck", "transport", "goods",
                "supply", "economic", "revenue",
            ]),
            high_impact_bonus: 1.5,
            economic_bonus: 1.0,
            floor: 1.0,
            ceiling: 10.0,
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self {
            category_keywords: BTreeMap::from([
                (
                    Category::Road,
                    words(&[
                        "pothole", "road", "street", "pavement", "traffic", "sign", "marking",
                        "intersection", "sidewalk", "curb",
                    ]),
                ),
                (
                    Category::Electricity,
                    words(&[
                        "light", "power", "electric", "lamp", "pole", "wire", "outage",
                        "streetlight", "electrical",
                    ]),
                ),
                (
                    Category::Water,
                    words(&[
                        "water", "leak", "pipe", "drain", "sewer", "flooding", "overflow", "burst",
                        "supply",
                    ]),
                ),
                (
                    Category::Sanitation,
                    words(&[
                        "trash", "garbage", "waste", "cleaning", "dirty", "bins", "collection",
                        "hygiene", "litter", "dumpster",
                    ]),
                ),
                (
                    Category::Transport,
                    words(&["bus", "metro", "train", "transit", "railway", "shelter", "timetable"]),
                ),
                (
                    Category::Infrastructure,
                    words(&["bridge", "building", "wall", "fence", "bench", "playground", "railing"]),
                ),
                (
                    Category::Environment,
                    words(&["tree", "pollution", "smoke", "noise", "dumping", "stray", "air quality"]),
                ),
            ]),
            urgency_keywords: BTreeMap::from([
                (
                    UrgencyLabel::Critical,
                    words(&[
                        "emergency", "dangerous", "urgent", "immediate", "critical",
                        "life threatening", "accident", "fire", "explosion", "collapse",
                    ]),
                ),
                (
                    UrgencyLabel::High,
                    words(&[
                        "broken", "severe", "major", "blocked", "flooded", "outage", "leak",
                        "damage", "hazard", "safety",
                    ]),
                ),
                (
                    UrgencyLabel::Medium,
                    words(&[
                        "issue", "problem", "concern", "needs", "repair", "fix", "maintenance",
                        "improvement",
                    ]),
                ),
                (
                    UrgencyLabel::Low,
                    words(&[
                        "minor", "small", "cosmetic", "suggestion", "enhancement", "when possible",
                        "eventually",
                    ]),
                ),
            ]),
            category_urgency: BTreeMap::from([
                (Category::Road, words(&["blocked", "traffic", "accident", "dangerous"])),
                (Category::Electricity, words(&["outage", "dark", "dangerous", "sparking"])),
                (Category::Water, words(&["flooding", "burst", "leak", "overflow"])),
                (Category::Sanitation, words(&["overflowing", "smell", "health", "rats"])),
            ]),
            time_phrases: words(&["days", "weeks", "months", "yesterday", "today", "since"]),
            stop_words: english_stop_words(),
        }
    }
}
