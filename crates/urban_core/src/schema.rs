use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed vocabulary of issue categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Road,
    Electricity,
    Water,
    Sanitation,
    Transport,
    Infrastructure,
    Environment,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Road,
        Category::Electricity,
        Category::Water,
        Category::Sanitation,
        Category::Transport,
        Category::Infrastructure,
        Category::Environment,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Road => "road",
            Category::Electricity => "electricity",
            Category::Water => "water",
            Category::Sanitation => "sanitation",
            Category::Transport => "transport",
            Category::Infrastructure => "infrastructure",
            Category::Environment => "environment",
            Category::Other => "other",
        }
    }

    /// Lenient parse used where malformed data must not block scoring.
    pub fn parse_or_other(value: Option<&str>) -> Category {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Category::Other)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "road" => Ok(Category::Road),
            "electricity" => Ok(Category::Electricity),
            "water" => Ok(Category::Water),
            "sanitation" | "dustbin" => Ok(Category::Sanitation),
            "transport" => Ok(Category::Transport),
            "infrastructure" => Ok(Category::Infrastructure),
            "environment" => Ok(Category::Environment),
            "other" | "others" => Ok(Category::Other),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    Open,
    Resolved,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolved" => Ok(IssueStatus::Resolved),
            // pending / in_progress and friends are all still open
            _ => Ok(IssueStatus::Open),
        }
    }
}

/// Discrete level derived from the weighted priority score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::VeryLow => "very_low",
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "very_low" => Ok(PriorityLevel::VeryLow),
            "low" => Ok(PriorityLevel::Low),
            "medium" => Ok(PriorityLevel::Medium),
            "high" => Ok(PriorityLevel::High),
            "critical" => Ok(PriorityLevel::Critical),
            other => Err(format!("unknown priority level: {other}")),
        }
    }
}

/// Coarse urgency label predicted from text (no very_low tier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLabel {
    Low,
    Medium,
    High,
    Critical,
}

impl UrgencyLabel {
    pub const ALL: [UrgencyLabel; 4] = [
        UrgencyLabel::Critical,
        UrgencyLabel::High,
        UrgencyLabel::Medium,
        UrgencyLabel::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLabel::Low => "low",
            UrgencyLabel::Medium => "medium",
            UrgencyLabel::High => "high",
            UrgencyLabel::Critical => "critical",
        }
    }
}

impl fmt::Display for UrgencyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UrgencyLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" | "very_low" => Ok(UrgencyLabel::Low),
            "medium" => Ok(UrgencyLabel::Medium),
            "high" => Ok(UrgencyLabel::High),
            "critical" => Ok(UrgencyLabel::Critical),
            other => Err(format!("unknown urgency label: {other}")),
        }
    }
}

impl From<PriorityLevel> for UrgencyLabel {
    fn from(level: PriorityLevel) -> Self {
        match level {
            PriorityLevel::VeryLow | PriorityLevel::Low => UrgencyLabel::Low,
            PriorityLevel::Medium => UrgencyLabel::Medium,
            PriorityLevel::High => UrgencyLabel::High,
            PriorityLevel::Critical => UrgencyLabel::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    pub id: String,                      // opaque identifier assigned at intake
    pub title: String,
    pub description: String,
    pub category: Option<String>,        // raw stored value; parsed leniently
    pub reported_priority: Option<String>, // urgency label chosen at intake, if any
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub status: IssueStatus,
    pub created_at: String,              // RFC 3339, immutable once set
    pub ai_severity_score: Option<f64>,  // 0-10, from image analysis
    pub priority_score: Option<f64>,
    pub priority_level: Option<PriorityLevel>,
    pub priority_breakdown: Option<PriorityBreakdown>,
}

/// Intake payload for a new issue before it is assigned an id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub category: String,
    pub reported_priority: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub created_at: Option<String>,
    pub ai_severity_score: Option<f64>,
}

/// Everything the scoring engine reads about one issue.
#[derive(Debug, Clone)]
pub struct IssueSnapshot {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<Category>,
    pub coordinates: Option<Coordinates>,
    pub address: String,
    pub created_at: String,
    pub ai_severity_score: Option<f64>,
    pub citizen_vote_average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FactorScores {
    pub severity: f64,
    pub location: f64,
    pub reports_count: f64,
    pub age: f64,
    pub safety_impact: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FactorWeights {
    pub severity: f64,
    pub location: f64,
    pub reports_count: f64,
    pub age: f64,
    pub safety_impact: f64,
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.severity + self.location + self.reports_count + self.age + self.safety_impact
    }
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            severity: 0.35,
            location: 0.25,
            reports_count: 0.15,
            age: 0.15,
            safety_impact: 0.10,
        }
    }
}

/// Audit record of one scoring pass, persisted verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PriorityBreakdown {
    pub final_score: f64,
    pub priority_level: PriorityLevel,
    pub factor_scores: FactorScores,
    pub weights: FactorWeights,
    pub duplicate_count: usize,
    pub calculation_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CitizenVote {
    pub issue_id: String,
    pub user_id: String,
    pub rating: u8,          // 1-10
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DuplicateLink {
    pub issue_id: String,
    pub duplicate_issue_id: String,
    pub reporter_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMethod {
    MlModel,
    RuleBased,
    Provided,
}

impl PredictionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionMethod::MlModel => "ml_model",
            PredictionMethod::RuleBased => "rule_based",
            PredictionMethod::Provided => "provided",
        }
    }
}

/// Advisory classifier output; callers may accept or override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Prediction<L> {
    pub label: L,
    pub confidence: f64,     // 0-1
    pub method: PredictionMethod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct PredictionExplanation {
    pub category_reasoning: Vec<String>,
    pub priority_reasoning: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IssuePredictions {
    pub category: Prediction<Category>,
    pub priority: Prediction<UrgencyLabel>,
    pub explanation: PredictionExplanation,
    pub timestamp: String,
}

/// Why a priority was recomputed; recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    Manual,
    SeverityVote,
    DuplicateMark,
    Batch,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Manual => "manual",
            TriggerReason::SeverityVote => "severity_vote",
            TriggerReason::DuplicateMark => "duplicate_mark",
            TriggerReason::Batch => "batch",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PriorityLogEntry {
    pub issue_id: String,
    pub old_priority_score: Option<f64>,
    pub new_priority_score: f64,
    pub old_priority_level: Option<PriorityLevel>,
    pub new_priority_level: PriorityLevel,
    pub trigger_reason: String,
    pub created_at: String,
}
