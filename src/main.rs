use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dropout_risk::api::{self, AppState};
use dropout_risk::data::{self, into_labeled};
use dropout_risk::{AppConfig, ClassifierEnsemble, ModelStore, RiskAssessor, TrainingPipeline, TrainingReport};

const DEFAULT_MODEL_DIR: &str = "models";

#[derive(Parser)]
#[command(name = "dropout-risk")]
#[command(about = "Student dropout risk scoring: rules plus trained classifiers", long_about = None)]
struct Cli {
    /// TOML file overriding thresholds, weights and training parameters
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the stored model set
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the scoring API
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Train every configured model from a labeled CSV and store the result
    Train {
        #[arg(long)]
        csv: PathBuf,
        /// Replace an existing stored model set
        #[arg(long)]
        force: bool,
    },
    /// Score an unlabeled CSV and print the assessments as JSON
    Score {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        model: Option<String>,
    },
    /// Write a synthetic labeled cohort
    SampleData {
        #[arg(long, default_value = "data/students.csv")]
        out: PathBuf,
        #[arg(long, default_value_t = 500)]
        rows: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => AppConfig::default(),
    };
    let model_dir = cli
        .model_dir
        .clone()
        .or_else(|| config.model_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_DIR));
    let store = ModelStore::new(model_dir);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind.clone());
            serve(config, store, &bind).await?;
        }
        Commands::Train { csv, force } => {
            train(&config, &store, &csv, force)?;
        }
        Commands::Score { csv, model } => {
            let ensemble = load_ensemble(&store)?;
            let assessor = RiskAssessor::new(config.scoring, Arc::new(ensemble));
            let records = data::load_records(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let batch = assessor.assess_batch(records, model.as_deref());
            println!("{}", serde_json::to_string_pretty(&batch)?);
        }
        Commands::SampleData { out, rows, seed } => {
            if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let cohort = data::generate_sample_cohort(rows, seed);
            let high_risk = cohort.iter().filter(|row| row.high_risk).count();
            data::write_labeled(&out, &cohort)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Wrote {} students ({} high risk) to {}", rows, high_risk, out.display());
        }
    }

    Ok(())
}

async fn serve(config: AppConfig, store: ModelStore, bind: &str) -> anyhow::Result<()> {
    let loader = store.clone();
    let ensemble = tokio::task::spawn_blocking(move || load_ensemble(&loader))
        .await
        .context("model loading task panicked")??;
    if !ensemble.is_trained() {
        warn!("no stored model set, scoring with rules only until trained");
    }

    let state = Arc::new(AppState::new(
        RiskAssessor::new(config.scoring.clone(), Arc::new(ensemble)),
        TrainingPipeline::new(config.scoring.training.clone()),
        Some(store),
    ));

    println!("Dropout risk API listening on http://{bind}");
    api::start_api(state, bind).await.context("API server failed")?;
    Ok(())
}

fn load_ensemble(store: &ModelStore) -> anyhow::Result<ClassifierEnsemble> {
    let ensemble = ClassifierEnsemble::new();
    if let Some(set) = store
        .load()
        .with_context(|| format!("failed to load {}", store.path().display()))?
    {
        ensemble.install(set);
    }
    Ok(ensemble)
}

fn train(config: &AppConfig, store: &ModelStore, csv: &Path, force: bool) -> anyhow::Result<()> {
    if store.exists() && !force {
        bail!(
            "a model set is already stored at {}; pass --force to replace it",
            store.path().display()
        );
    }

    let records = data::load_labeled(csv).with_context(|| format!("failed to read {}", csv.display()))?;
    let (rows, rejected) = into_labeled(records);
    for rejection in &rejected {
        warn!(row = rejection.row, error = %rejection.error, "skipping labeled row");
    }
    info!(rows = rows.len(), rejected = rejected.len(), "loaded labeled data");

    let pipeline = TrainingPipeline::new(config.scoring.training.clone());
    let mut set = pipeline.train(&rows).context("training failed")?;
    set.version = store.next_version();
    let path = store.save(&set)?;

    let report = TrainingReport::new(&set, rejected);
    print_report(&report);
    if let Some(best) = set.models.get(&set.default_model) {
        println!("\nTop features for {}:", best.model_id);
        for importance in best.feature_importances().iter().take(5) {
            println!("  {:<24} {:.3}", importance.feature, importance.importance);
        }
    }
    println!("\nSaved model set to {}", path.display());
    Ok(())
}

fn print_report(report: &TrainingReport) {
    println!(
        "Trained on {} rows, evaluated on {} held-out rows ({} rows rejected)",
        report.training_rows,
        report.holdout_rows,
        report.rejected.len()
    );
    println!(
        "{:<22} {:>9} {:>9} {:>9} {:>9} {:>9}",
        "model", "accuracy", "precision", "recall", "f1", "roc_auc"
    );
    for model in &report.models {
        let m = &model.metrics;
        let auc = m.roc_auc.map_or_else(|| "n/a".to_string(), |v| format!("{v:.3}"));
        println!(
            "{:<22} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>9}",
            model.model_id, m.accuracy, m.precision, m.recall, m.f1, auc
        );
    }
    println!("Default model: {}", report.default_model);
}
