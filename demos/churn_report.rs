use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use churnscope::prelude::*;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Usage: `churn_report <table.csv|table.xlsx>... [--model model.json]`
fn main() -> Result<()> {
    init_tracing();

    let (tables, model) = parse_args()?;
    let raw = tables
        .iter()
        .map(read_table)
        .collect::<ChurnResult<Vec<_>>>()
        .context("Failed to read input tables")?;

    let ingested = ingest(raw)?;
    for (name, err) in &ingested.rejected {
        warn!(table = %name, "Skipped: {err}");
    }
    let Some(games) = ingested.game.as_ref() else {
        bail!("No game table among the inputs");
    };

    let features = build_features(games, ingested.wallet.as_ref())?;
    info!(players = features.height(), "Built player features");

    let dashboard = Dashboard::from_records(Some(games), ingested.wallet.as_ref());
    let mut report = json!({
        "kpis": dashboard.kpis,
        "features": features.to_json()?,
        "dashboard": views_to_json(&dashboard.views())?,
    });

    if let Some(path) = model {
        let model = LogisticModel::from_path(&path)
            .with_context(|| format!("Failed to load model {}", path.display()))?;
        let scored = score(&features, &model)?;
        info!(churners = scored.churn_count()?, "Scored players");

        let insights = ChurnInsights::from_scored(&scored);
        report["scored"] = scored.to_json()?;
        report["insights"] = views_to_json(&insights.views())?;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn views_to_json(views: &[(&str, &View<polars::frame::DataFrame>)]) -> Result<serde_json::Value> {
    let mut out = serde_json::Map::new();
    for (name, view) in views {
        out.insert(name.to_string(), view.to_json()?);
    }
    Ok(serde_json::Value::Object(out))
}

fn parse_args() -> Result<(Vec<PathBuf>, Option<PathBuf>)> {
    let mut tables = Vec::new();
    let mut model = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--model" {
            model = Some(PathBuf::from(
                args.next().context("--model expects a path")?,
            ));
        } else {
            tables.push(PathBuf::from(arg));
        }
    }

    if tables.is_empty() {
        bail!("Usage: churn_report <table.csv|table.xlsx>... [--model model.json]");
    }
    Ok((tables, model))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
