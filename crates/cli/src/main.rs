//! localpred Command Line Interface
//!
//! Evaluates a saved model, ensemble, cluster or anomaly detector description
//! against one input record and prints the outcome as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use localpred_core::{
    input_from_json, predict, CombinationMethod, EngineConfig, InputRecord, MissingStrategy,
    ModelResolver, Multiple, NoModels, PredictError, PredictOptions, Resource,
};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "localpred")]
#[command(author = "localpred Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Offline predictions from saved model descriptions", long_about = None)]
struct Args {
    /// Resource description (JSON file)
    #[arg(short, long)]
    resource: PathBuf,

    /// Input record as inline JSON, or @FILE to read it from a file
    #[arg(short, long, default_value = "{}")]
    input: String,

    /// Directory holding ensemble member descriptions as <id with '/' replaced by '_'>.json
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input keys are field names instead of field ids
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    by_name: Option<bool>,

    /// Missing-value strategy: last_prediction or proportional
    #[arg(long)]
    strategy: Option<MissingStrategy>,

    /// Vote combination: plurality, confidence, probability or threshold
    #[arg(long)]
    method: Option<CombinationMethod>,

    /// Number of categories to return, or "all"
    #[arg(long)]
    multiple: Option<Multiple>,

    /// Minimum number of votes for the threshold method
    #[arg(long)]
    threshold: Option<u32>,

    /// Category singled out by the threshold method
    #[arg(long)]
    category: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_confidence: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_distribution: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_count: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_median: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_min: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    add_max: Option<bool>,

    /// Reject input keys that do not match a field
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    strict: Option<bool>,

    /// Print the precomputed top anomalies instead of scoring
    #[arg(long)]
    top_anomalies: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Overlay the options given on the command line onto `options`
    fn apply(&self, options: &mut PredictOptions) {
        let flags = [
            (self.by_name, &mut options.by_name),
            (self.add_confidence, &mut options.add_confidence),
            (self.add_distribution, &mut options.add_distribution),
            (self.add_count, &mut options.add_count),
            (self.add_median, &mut options.add_median),
            (self.add_min, &mut options.add_min),
            (self.add_max, &mut options.add_max),
            (self.strict, &mut options.strict),
        ];
        for (flag, target) in flags {
            if let Some(value) = flag {
                *target = value;
            }
        }
        if let Some(multiple) = self.multiple {
            options.multiple = multiple;
        }
        if self.strategy.is_some() {
            options.strategy = self.strategy;
        }
        if self.method.is_some() {
            options.method = self.method;
        }
        if self.threshold.is_some() {
            options.threshold = self.threshold;
        }
        if self.category.is_some() {
            options.category = self.category.clone();
        }
    }
}

/// Resolves ensemble members from JSON files in a directory
struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, model_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", model_id.replace('/', "_")))
    }
}

impl ModelResolver for DirectoryResolver {
    fn resolve(&self, model_id: &str) -> localpred_core::Result<Option<Value>> {
        let path = self.path_for(model_id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(model = model_id, path = %path.display(), "model not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            warn!(model = model_id, path = %path.display(), "invalid model JSON: {e}");
            PredictError::MalformedModel(format!("{}: {e}", path.display()))
        })
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_input(arg: &str) -> Result<InputRecord> {
    let value = match arg.strip_prefix('@') {
        Some(path) => read_json(Path::new(path))?,
        None => serde_json::from_str(arg).context("Failed to parse input JSON")?,
    };
    input_from_json(&value).context("Invalid input record")
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Configuration file (if any) with `LOCALPRED_*` overrides applied
///
/// Runs before logging is installed, so it does not log itself.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            EngineConfig::from_toml_str(&content)
                .with_context(|| format!("Failed to load config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid LOCALPRED_* environment override")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let level = if args.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_logging(level)?;
    if let Some(path) = &args.config {
        info!(path = %path.display(), level, "Configuration loaded");
    }

    let mut options = config.defaults.clone();
    args.apply(&mut options);
    options.validate().context("Invalid prediction options")?;

    let description = read_json(&args.resource)?;
    let resource = match &args.models_dir {
        Some(dir) => Resource::from_json_with_resolver(&description, &DirectoryResolver::new(dir)),
        None => Resource::from_json_with_resolver(&description, &NoModels),
    }
    .with_context(|| format!("Failed to load resource {}", args.resource.display()))?;
    info!(kind = %resource.kind(), id = resource.resource_id().unwrap_or("inline"), "Resource ready");

    if args.top_anomalies {
        let Resource::Anomaly(anomaly) = &resource else {
            bail!("--top-anomalies requires an anomaly detector, got a {}", resource.kind());
        };
        println!("{}", serde_json::to_string_pretty(anomaly.top_anomalies())?);
        return Ok(());
    }

    let input = read_input(&args.input)?;
    let outcome = predict(&resource, &input, &options).context("Prediction failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use localpred_core::FieldValue;
    use serde_json::json;

    #[test]
    fn test_read_inline_and_file_input() {
        let inline = read_input(r#"{"petal width": 0.5}"#).unwrap();
        assert_eq!(inline.get("petal width"), Some(&FieldValue::Number(0.5)));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.json");
        fs::write(&path, r#"{"species": "setosa"}"#).unwrap();
        let from_file = read_input(&format!("@{}", path.display())).unwrap();
        assert_eq!(from_file.get("species"), Some(&FieldValue::from("setosa")));

        assert!(read_input("[1, 2]").is_err());
    }

    #[test]
    fn test_directory_resolver() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model_abc.json"), r#"{"resource": "model/abc"}"#).unwrap();
        fs::write(dir.path().join("model_bad.json"), "not json").unwrap();

        let resolver = DirectoryResolver::new(dir.path());
        assert_eq!(
            resolver.resolve("model/abc").unwrap(),
            Some(json!({"resource": "model/abc"}))
        );
        assert!(matches!(
            resolver.resolve("model/bad"),
            Err(PredictError::MalformedModel(_))
        ));
        assert_eq!(resolver.resolve("model/missing").unwrap(), None);
    }

    #[test]
    fn test_flags_become_options() {
        let args = Args::parse_from([
            "localpred",
            "--resource",
            "model.json",
            "--by-name",
            "--strategy",
            "proportional",
            "--multiple",
            "all",
            "--method",
            "1",
        ]);
        let mut options = PredictOptions::default();
        args.apply(&mut options);
        assert!(options.by_name);
        assert_eq!(options.strategy, Some(MissingStrategy::Proportional));
        assert_eq!(options.multiple, Multiple::All);
        assert_eq!(options.method, Some(CombinationMethod::Confidence));
    }

    #[test]
    fn test_flags_can_switch_off_config_values() {
        let mut options = PredictOptions {
            by_name: true,
            add_count: true,
            add_confidence: true,
            multiple: Multiple::Top(3),
            ..Default::default()
        };
        let args = Args::parse_from([
            "localpred",
            "--resource",
            "model.json",
            "--by-name=false",
            "--add-count",
            "false",
            "--multiple",
            "0",
        ]);
        args.apply(&mut options);
        assert!(!options.by_name);
        assert!(!options.add_count);
        assert!(options.add_confidence);
        assert_eq!(options.multiple, Multiple::Off);
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("localpred.toml");
        fs::write(&path, "[defaults]\nadd_count = true\n\n[logging]\nlevel = \"warn\"\n").unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert!(config.defaults.add_count);
        assert_eq!(config.logging.level, "warn");

        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
        fs::write(&path, "[defaults").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
