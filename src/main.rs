use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;
use rad::arrow_handler::{build_prediction_result, parse_arrow_ipc};
use rad::inventory::inventory_to_dataset;
use rad::preprocess::Mappings;
use rad::{
    Dataset, DetectionEngine, ForestOptions, IsolationForest, Prediction, PreprocessOptions,
    SavedModel,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rad")]
#[command(version)]
#[command(about = "Anomaly detection over tabular data with an Isolation Forest")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score the rows of a CSV file
    Csv {
        /// Path to CSV file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Score the records of a JSON array file
    Json {
        /// Path to JSON file
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Score each host of a saved host-inventory response
    Inventory {
        /// Path to the inventory JSON response
        #[arg(short, long)]
        file: PathBuf,

        #[command(flatten)]
        detect: DetectArgs,
    },

    /// Score an Arrow IPC stream (`id` column + Float64 features)
    Arrow {
        /// Path to the Arrow IPC stream
        #[arg(short, long)]
        file: PathBuf,

        /// Where to write the Arrow IPC predictions
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        forest: ForestArgs,

        #[command(flatten)]
        model: ModelArgs,
    },
}

#[derive(Args)]
struct ForestArgs {
    /// Number of trees in the forest [default: 100]
    #[arg(long)]
    trees: Option<usize>,

    /// Rows drawn per tree [default: min(256, rows)]
    #[arg(long)]
    sample_size: Option<usize>,

    /// Score at or above which a record is anomalous [default: 0.5]
    #[arg(long)]
    threshold: Option<f64>,

    /// Seed for a reproducible forest
    #[arg(long)]
    seed: Option<u64>,

    /// JSON file with forest options; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ModelArgs {
    /// Score with a previously saved model instead of building one;
    /// only `--threshold` may be combined with it
    #[arg(long)]
    model: Option<PathBuf>,

    /// Save the built forest to this path
    #[arg(long, conflicts_with = "model")]
    save_model: Option<PathBuf>,
}

#[derive(Args)]
struct DetectArgs {
    #[command(flatten)]
    forest: ForestArgs,

    #[command(flatten)]
    model: ModelArgs,

    /// Column(s) identifying each row
    #[arg(long, value_delimiter = ',')]
    index: Vec<String>,

    /// Column(s) to drop before scoring
    #[arg(long, value_delimiter = ',')]
    drop: Vec<String>,

    /// Build one forest per group of these column(s)
    #[arg(long, value_delimiter = ',')]
    on: Vec<String>,

    /// Groups with this many rows or fewer are skipped
    #[arg(long, default_value_t = 50)]
    min_records: usize,

    /// Only print anomalous records
    #[arg(long)]
    anomalies_only: bool,
}

#[derive(Serialize)]
struct GroupedPrediction<'a> {
    group: &'a str,
    #[serde(flatten)]
    prediction: &'a Prediction,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Csv { file, detect } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let dataset = Dataset::from_csv(dataset_name(&file), &content)?;
            run_tabular(dataset, &detect)
        }

        Commands::Json { file, detect } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let dataset = Dataset::from_json(dataset_name(&file), &content)?;
            run_tabular(dataset, &detect)
        }

        Commands::Inventory { file, detect } => {
            let content = fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let response: serde_json::Value = serde_json::from_str(&content)?;
            let mut dataset = inventory_to_dataset(&response)?;
            dataset.name = dataset_name(&file);
            run_tabular(dataset, &detect)
        }

        Commands::Arrow {
            file,
            output,
            forest: forest_args,
            model,
        } => {
            let bytes =
                fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let parsed = parse_arrow_ipc(&bytes)?;
            info!(
                "Loaded Arrow stream with {} rows, feature columns: {:?}",
                parsed.features.nrows(),
                parsed.columns
            );

            let (forest, features) = match &model.model {
                Some(path) => {
                    let saved = load_model(path, &forest_args)?;
                    if !saved.mappings().is_empty() {
                        bail!("model has categorical columns, score it with csv/json/inventory");
                    }
                    let features = saved.align(&parsed.columns, parsed.features.view())?;
                    (saved.forest().clone(), features)
                }
                None => {
                    let options = forest_args.resolve()?;
                    let built = IsolationForest::build(parsed.features.view(), &options)?;
                    if let Some(path) = &model.save_model {
                        let columns = parsed.columns.clone();
                        let saved = SavedModel::new(columns, Mappings::new(), built.clone())?;
                        save_model(&saved, path)?;
                    }
                    (built, parsed.features)
                }
            };

            let predictions = forest.predict_labeled(features.view(), &parsed.ids)?;
            fs::write(&output, build_prediction_result(&predictions)?)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!("Wrote {} predictions to {}", predictions.len(), output.display());
            Ok(())
        }
    }
}

fn run_tabular(dataset: Dataset, args: &DetectArgs) -> anyhow::Result<()> {
    let name = dataset.name.clone();
    info!(
        "Loaded dataset '{}' with {} records, fields: {:?}",
        name,
        dataset.len(),
        dataset.get_field_names()
    );

    let mut engine = DetectionEngine::new();
    engine.add_dataset(dataset);

    let preprocess_options = PreprocessOptions {
        index: args.index.clone(),
        drop: args.drop.clone(),
    };

    if let Some(path) = &args.model.model {
        if !args.on.is_empty() {
            bail!("--model cannot be combined with --on");
        }
        let model = load_model(path, &args.forest)?;
        let predictions = engine.score_with(&name, &preprocess_options, &model)?;
        return print_predictions(&predictions, None, args.anomalies_only);
    }

    if !args.on.is_empty() {
        if args.model.save_model.is_some() {
            bail!("--save-model cannot be combined with --on");
        }
        let groups = engine.detect_grouped(
            &name,
            &args.on,
            args.min_records,
            &preprocess_options,
            &args.forest.resolve()?,
        )?;
        for group in &groups {
            let key = Some(group.key.as_str());
            print_predictions(&group.detection.predictions, key, args.anomalies_only)?;
        }
        return Ok(());
    }

    let detection = engine.detect(&name, &preprocess_options, &args.forest.resolve()?)?;
    info!(
        "{} of {} records anomalous",
        detection.anomalies().count(),
        detection.predictions.len()
    );
    if let Some(path) = &args.model.save_model {
        save_model(&detection.to_model()?, path)?;
    }
    print_predictions(&detection.predictions, None, args.anomalies_only)
}

fn print_predictions(
    predictions: &[Prediction],
    group: Option<&str>,
    anomalies_only: bool,
) -> anyhow::Result<()> {
    for prediction in predictions.iter().filter(|p| !anomalies_only || p.is_anomalous) {
        let line = match group {
            Some(group) => serde_json::to_string(&GroupedPrediction { group, prediction })?,
            None => serde_json::to_string(prediction)?,
        };
        println!("{}", line);
    }
    Ok(())
}

impl ForestArgs {
    /// Options from `--config` (if any), overridden by explicit flags
    fn resolve(&self) -> anyhow::Result<ForestOptions> {
        let mut options = match &self.config {
            Some(path) => {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("invalid forest options in {}", path.display()))?
            }
            None => ForestOptions::default(),
        };

        if let Some(trees) = self.trees {
            options.num_trees = trees;
        }
        if self.sample_size.is_some() {
            options.sample_size = self.sample_size;
        }
        if let Some(threshold) = self.threshold {
            options.anomaly_threshold = threshold;
        }
        if self.seed.is_some() {
            options.seed = self.seed;
        }
        Ok(options)
    }
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

/// Load a saved model, applying `--threshold` and refusing the build-only flags
fn load_model(path: &Path, args: &ForestArgs) -> anyhow::Result<SavedModel> {
    if args.trees.is_some() || args.sample_size.is_some() || args.seed.is_some() {
        bail!("--trees, --sample-size and --seed only apply when building a forest");
    }
    if args.config.is_some() {
        bail!("--config only applies when building a forest");
    }

    let json =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut model = SavedModel::from_json(&json)?;
    if let Some(threshold) = args.threshold {
        model.set_anomaly_threshold(threshold)?;
    }
    info!(
        "Loaded forest with {} trees from {}",
        model.forest().num_trees(),
        path.display()
    );
    Ok(model)
}

fn save_model(model: &SavedModel, path: &Path) -> anyhow::Result<()> {
    fs::write(path, model.to_json()?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Saved model to {}", path.display());
    Ok(())
}
