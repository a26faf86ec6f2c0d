use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use schemars::schema_for;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use urban_core::classifier::IssueClassifier;
use urban_core::config::{AppConfig, Overrides};
use urban_core::db::{self, IssueFilter};
use urban_core::rules::RuleSet;
use urban_core::schema::{Category, IssueStatus, NewIssue, TriggerReason};
use urban_core::training::{TrainingOptions, train_models};
use urban_core::voting::PriorityService;

#[derive(Parser)]
#[command(name = "urbanfix")]
#[command(about = "Municipal issue priority engine", long_about = None)]
struct Cli {
    /// SQLite database path [env: URBANFIX_DB]
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Directory holding trained models [env: URBANFIX_MODELS_DIR]
    #[arg(long, global = true)]
    models_dir: Option<PathBuf>,

    /// Directory with priority_config.toml and keywords.yaml [env: URBANFIX_RULES_DIR]
    #[arg(long, global = true)]
    rules_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and models directory
    Init,
    /// Print the resolved configuration
    Config,
    /// Manage issue records
    Issue {
        #[command(subcommand)]
        command: IssueCommands,
    },
    /// Predict category and urgency for a piece of text
    Classify {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        /// Skip category prediction and use this one
        #[arg(long)]
        category: Option<Category>,
    },
    /// Recompute one issue's priority
    Score { id: String },
    /// Recompute every unresolved issue
    RecalcAll,
    /// List unresolved issues at or above the critical threshold
    Critical {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Record a citizen severity rating (1-10)
    Vote {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long, allow_negative_numbers = true)]
        rating: i64,
    },
    /// Mark two issues as duplicates of each other
    Duplicate {
        id: String,
        duplicate_id: String,
        #[arg(long)]
        user: String,
    },
    /// Train the category and priority models from stored issues
    Train {
        /// Fraction of samples held out for accuracy
        #[arg(long, default_value_t = 0.2)]
        test_fraction: f64,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Write the Markdown priority digest
    Digest {
        #[arg(long, default_value = "digest")]
        out_dir: PathBuf,
        #[arg(long)]
        include_resolved: bool,
    },
    /// Export canonical JSON Schemas to the ./schemas directory
    Schema {
        #[command(subcommand)]
        command: SchemaCommands,
    },
}

#[derive(Subcommand)]
enum IssueCommands {
    /// Validate, store and score a new issue
    Add(AddIssue),
    /// Show an issue with its votes, links and priority history
    Show { id: String },
    /// List issues by priority
    List {
        #[arg(long)]
        category: Option<Category>,
        #[arg(long)]
        all: bool,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Mark an issue resolved
    Resolve { id: String },
    /// Reopen a resolved issue
    Reopen { id: String },
}

#[derive(Args)]
struct AddIssue {
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    /// Predicted from the text when omitted
    #[arg(long)]
    category: Option<String>,
    /// Urgency chosen by the reporter (low, medium, high, critical)
    #[arg(long)]
    priority: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    lat: f64,
    #[arg(long, allow_negative_numbers = true)]
    lng: f64,
    #[arg(long, default_value = "")]
    address: String,
    /// Image-analysis severity, 0-10
    #[arg(long)]
    ai_score: Option<f64>,
    /// RFC 3339 creation time (default: now)
    #[arg(long)]
    created_at: Option<String>,
    /// Explicit id (default: random UUID)
    #[arg(long)]
    id: Option<String>,
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// Export JSON Schema files for canonical types
    Export {
        /// Output directory (default: ./schemas)
        #[arg(long, default_value = "schemas")]
        out_dir: PathBuf,
    },
}

struct App {
    config: AppConfig,
    rules: Arc<RuleSet>,
}

impl App {
    fn load(overrides: Overrides) -> Result<Self> {
        let config = AppConfig::resolve(overrides)?;
        let rules = RuleSet::load_or_default(config.rules_dir.as_deref())
            .with_context(|| format!("loading rules from {:?}", config.rules_dir))?;
        Ok(Self {
            config,
            rules: Arc::new(rules),
        })
    }

    fn store(&self) -> Result<Connection> {
        db::open(&self.config.db_path).with_context(|| format!("opening {}", self.config.db_path.display()))
    }

    fn service(&self) -> PriorityService {
        PriorityService::new(self.rules.clone())
    }

    fn classifier(&self) -> IssueClassifier {
        IssueClassifier::load(&self.config.models_dir, self.rules.clone())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("urban_core=info,urbanfix=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::load(Overrides {
        db_path: cli.db,
        models_dir: cli.models_dir,
        rules_dir: cli.rules_dir,
    })?;
    let now = OffsetDateTime::now_utc();

    match cli.command {
        Commands::Init => init(&app),
        Commands::Config => print_toml(&ConfigView::from(&app.config)),
        Commands::Issue { command } => issue(&app, command, now),
        Commands::Classify {
            title,
            description,
            category,
        } => print_json(&app.classifier().get_predictions(&title, &description, category)),
        Commands::Score { id } => {
            let mut conn = app.store()?;
            print_json(&app.service().recalculate_priority(&mut conn, &id, TriggerReason::Manual, now)?)
        }
        Commands::RecalcAll => {
            let mut conn = app.store()?;
            print_json(&app.service().recalculate_all_priorities(&mut conn, now)?)
        }
        Commands::Critical { limit } => {
            let conn = app.store()?;
            let threshold = app.rules.priority.thresholds.critical;
            print_json(&db::critical_issues(&conn, threshold, limit)?)
        }
        Commands::Vote { id, user, rating } => {
            let mut conn = app.store()?;
            print_json(&app.service().submit_severity_vote(&mut conn, &id, &user, rating, now)?)
        }
        Commands::Duplicate {
            id,
            duplicate_id,
            user,
        } => {
            let mut conn = app.store()?;
            print_json(&app.service().mark_duplicate(&mut conn, &id, &duplicate_id, &user, now)?)
        }
        Commands::Train { test_fraction, seed } => train(&app, test_fraction, seed),
        Commands::Digest {
            out_dir,
            include_resolved,
        } => {
            let conn = app.store()?;
            let options = digest::DigestOptions {
                critical_threshold: app.rules.priority.thresholds.critical,
                include_resolved,
                ..Default::default()
            };
            let summary = digest::build_digest(&conn, &out_dir, &options, now)?;
            info!(notes = summary.notes_written, critical = summary.critical, "digest written");
            println!("Wrote digest to {}", out_dir.display());
            Ok(())
        }
        Commands::Schema { command } => match command {
            SchemaCommands::Export { out_dir } => schema_export(out_dir),
        },
    }
}

fn init(app: &App) -> Result<()> {
    app.store()?;
    fs::create_dir_all(&app.config.models_dir)?;
    info!(db = %app.config.db_path.display(), "store initialised");
    println!("Initialised {}", app.config.db_path.display());
    Ok(())
}

fn issue(app: &App, command: IssueCommands, now: OffsetDateTime) -> Result<()> {
    let mut conn = app.store()?;
    match command {
        IssueCommands::Add(args) => {
            let predicted = match &args.category {
                Some(_) => None,
                None => Some(app.classifier().predict_category(&args.title, &args.description)),
            };
            let category = match (&args.category, &predicted) {
                (Some(given), _) => given.clone(),
                (None, Some(prediction)) => prediction.label.as_str().to_string(),
                (None, None) => Category::Other.as_str().to_string(),
            };
            let id = args.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let new_issue = NewIssue {
                title: args.title,
                description: args.description,
                category,
                reported_priority: args.priority,
                latitude: args.lat,
                longitude: args.lng,
                address: args.address,
                created_at: args.created_at,
                ai_severity_score: args.ai_score,
            };
            let breakdown = app.service().create_issue(&mut conn, &id, &new_issue, now)?;
            print_json(&serde_json::json!({
                "id": id,
                "predicted_category": predicted,
                "priority": breakdown,
            }))
        }
        IssueCommands::Show { id } => {
            let issue = db::require_issue(&conn, &id)?;
            print_json(&serde_json::json!({
                "issue": issue,
                "votes": {
                    "count": db::vote_count(&conn, &id)?,
                    "average": db::vote_average(&conn, &id)?,
                },
                "duplicate_links": db::duplicate_links(&conn, &id)?,
                "priority_history": db::priority_logs(&conn, &id)?,
            }))
        }
        IssueCommands::List { category, all, limit } => {
            let filter = IssueFilter {
                category,
                status: (!all).then_some(IssueStatus::Open),
                limit,
            };
            print_json(&db::priority_sorted(&conn, &filter)?)
        }
        IssueCommands::Resolve { id } => set_status(&conn, &id, IssueStatus::Resolved),
        IssueCommands::Reopen { id } => set_status(&conn, &id, IssueStatus::Open),
    }
}

fn set_status(conn: &Connection, id: &str, status: IssueStatus) -> Result<()> {
    if !db::set_status(conn, id, status)? {
        bail!("issue {id} not found");
    }
    info!(issue_id = id, status = status.as_str(), "status updated");
    println!("{id}: {}", status.as_str());
    Ok(())
}

fn train(app: &App, test_fraction: f64, seed: u64) -> Result<()> {
    if !(0.0..1.0).contains(&test_fraction) {
        bail!("test fraction must be in [0, 1), got {test_fraction}");
    }
    let conn = app.store()?;
    let corpus = db::load_training_corpus(&conn)?;
    info!(samples = corpus.len(), "training corpus loaded");

    let options = TrainingOptions {
        test_fraction,
        seed,
        ..Default::default()
    };
    let report = train_models(&corpus, &app.rules.vocabulary, &app.config.models_dir, &options)?;
    print_json(&report)
}

/// Resolved configuration as printed by `urbanfix config`.
#[derive(Serialize)]
struct ConfigView {
    db_path: String,
    models_dir: String,
    rules_dir: Option<String>,
}

impl From<&AppConfig> for ConfigView {
    fn from(config: &AppConfig) -> Self {
        Self {
            db_path: config.db_path.display().to_string(),
            models_dir: config.models_dir.display().to_string(),
            rules_dir: config.rules_dir.as_ref().map(|dir| dir.display().to_string()),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_toml<T: Serialize>(value: &T) -> Result<()> {
    print!("{}", toml::to_string(value)?);
    Ok(())
}

fn schema_export(out_dir: PathBuf) -> Result<()> {
    fs::create_dir_all(&out_dir)?;

    let schemas = [
        ("Issue", schema_for!(urban_core::schema::Issue)),
        ("NewIssue", schema_for!(urban_core::schema::NewIssue)),
        ("PriorityBreakdown", schema_for!(urban_core::schema::PriorityBreakdown)),
        ("CitizenVote", schema_for!(urban_core::schema::CitizenVote)),
        ("DuplicateLink", schema_for!(urban_core::schema::DuplicateLink)),
        ("IssuePredictions", schema_for!(urban_core::schema::IssuePredictions)),
        ("PriorityLogEntry", schema_for!(urban_core::schema::PriorityLogEntry)),
    ];
    for (name, schema) in schemas {
        let json = serde_json::to_string_pretty(&schema)?;
        fs::write(out_dir.join(format!("{name}.schema.json")), json)?;
    }

    println!("Exported schemas to {}", out_dir.display());
    Ok(())
}
