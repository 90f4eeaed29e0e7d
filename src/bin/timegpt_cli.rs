//! TimeGPT CLI: 预测、API 密钥校验与用量查询的命令行工具
//!
//! Usage:
//!   timegpt-cli forecast --input <records.json> --horizon <h> [OPTIONS]
//!   timegpt-cli validate-key                       Check the configured API key
//!   timegpt-cli usage                              Show account usage

use anyhow::{bail, Context};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use timegpt_client::{
    ClientConfig, ColumnNames, ForecastOptions, FutureTable, SeriesTable, TimeGptClient,
    TimeGptClientBuilder,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "forecast" => cmd_forecast(&args[2..]).await,
        "validate-key" => cmd_validate_key(&args[2..]).await,
        "usage" => cmd_usage(&args[2..]).await,
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(err) = outcome {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"timegpt-cli: TimeGPT 命令行工具

USAGE:
    timegpt-cli <COMMAND> [OPTIONS]

COMMANDS:
    forecast                    Forecast series read from JSON records
    validate-key                Check that the API key is accepted
    usage                       Show account usage
    version                     Show version information
    help                        Show this help message

FORECAST OPTIONS:
    --input <path>              JSON array of records (required)
    --future <path>             JSON array of future covariate records
    --horizon <h>               Steps to forecast (required unless in --options)
    --freq <alias>              Frequency alias, e.g. D, h, MS (inferred if omitted)
    --model <name>              Model variant (default timegpt-1)
    --level <l1,l2,..>          Prediction interval levels, e.g. 80,95
    --add-history               Also print fitted values over the history
    --options <path>            YAML file with forecast options
    --id-col/--time-col/--target-col <name>
                                Column names (default unique_id, ds, y)

GLOBAL OPTIONS:
    --config <path>             YAML client configuration

ENVIRONMENT:
    NIXTLA_API_KEY              API key
    NIXTLA_BASE_URL             Service base URL
    RUST_LOG                    Log filter (default info)"#
    );
}

fn cmd_version() {
    println!("timegpt-cli {}", env!("CARGO_PKG_VERSION"));
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn client(args: &[String]) -> anyhow::Result<TimeGptClient> {
    let mut config = match flag(args, "--config") {
        Some(path) => ClientConfig::from_yaml_file(path)
            .with_context(|| format!("loading client configuration from {path}"))?,
        None => ClientConfig::default(),
    };
    // environment wins over the file
    config.apply_env();
    Ok(TimeGptClientBuilder::new().config(config).build()?)
}

fn read_json(path: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    let text = std::fs::read_to_string(PathBuf::from(path))
        .with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("{path} is not a JSON array of records"))
}

fn forecast_options(args: &[String]) -> anyhow::Result<ForecastOptions> {
    let mut opts = match flag(args, "--options") {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing forecast options in {path}"))?
        }
        None => ForecastOptions::default(),
    };
    if let Some(h) = flag(args, "--horizon") {
        opts.horizon = h.parse().with_context(|| format!("invalid --horizon {h}"))?;
    }
    if let Some(freq) = flag(args, "--freq") {
        opts = opts.with_frequency_alias(freq)?;
    }
    if let Some(model) = flag(args, "--model") {
        opts = opts.with_model(model);
    }
    if let Some(levels) = flag(args, "--level") {
        let level = levels
            .split(',')
            .map(|l| l.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("invalid --level {levels}"))?;
        opts = opts.with_level(level);
    }
    if args.iter().any(|a| a == "--add-history") {
        opts = opts.with_add_history(true);
    }
    if opts.horizon == 0 {
        bail!("--horizon is required");
    }
    Ok(opts)
}

async fn cmd_forecast(args: &[String]) -> anyhow::Result<()> {
    let Some(input) = flag(args, "--input") else {
        bail!("--input is required");
    };
    let defaults = ColumnNames::default();
    let columns = ColumnNames {
        id_col: flag(args, "--id-col").map_or(defaults.id_col, str::to_string),
        time_col: flag(args, "--time-col").map_or(defaults.time_col, str::to_string),
        target_col: flag(args, "--target-col").map_or(defaults.target_col, str::to_string),
    };

    let opts = forecast_options(args)?;
    let table = SeriesTable::from_json_records(&read_json(input)?, &columns)?;
    let future = match flag(args, "--future") {
        Some(path) => Some(FutureTable::from_json_records(&read_json(path)?, &columns)?),
        None => None,
    };

    let client = client(args)?;
    let (result, stats) = client
        .forecast_with_stats(&table, future.as_ref(), &opts)
        .await?;
    eprintln!(
        "{} series, {} batch(es), {} retries, {}ms",
        stats.series,
        stats.batches,
        stats.retries(),
        stats.duration.as_millis()
    );
    println!("{}", serde_json::to_string_pretty(&result.to_rows())?);
    Ok(())
}

async fn cmd_validate_key(args: &[String]) -> anyhow::Result<()> {
    if client(args)?.validate_api_key().await? {
        println!("API key is valid");
        Ok(())
    } else {
        bail!("API key was rejected")
    }
}

async fn cmd_usage(args: &[String]) -> anyhow::Result<()> {
    let usage = client(args)?.usage().await?;
    println!("{}", serde_json::to_string_pretty(&usage)?);
    Ok(())
}
