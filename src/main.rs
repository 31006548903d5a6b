use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
mod db;
mod indicators;
mod memory;
mod models;
mod report;
mod store;

use config::{DatabaseConfig, SITE_COURSE_ID};
use db::PgStore;
use indicators::IndicatorEngine;
use memory::MemoryStore;
use store::IndicatorStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Html,
    Markdown,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "course-indicators")]
#[command(about = "Course activity indicators summary for a learning platform", long_about = None)]
struct Cli {
    /// Course to report on
    #[arg(long, default_value_t = SITE_COURSE_ID)]
    course: i64,
    #[arg(long, value_enum, default_value_t = Format::Html)]
    format: Format,
    /// Output file, or output directory for csv. Defaults to stdout.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Read tables from a JSON snapshot instead of DATABASE_URL
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// Abort the whole report after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let cli = Cli::parse();

    match &cli.snapshot {
        Some(path) => {
            let store = MemoryStore::load(path)
                .with_context(|| format!("failed to load snapshot {}", path.display()))?;
            run(store, &cli).await
        }
        None => {
            let config = DatabaseConfig::from_env()?;
            let store = PgStore::connect(&config.url, &config.table_prefix)
                .await
                .context("failed to connect to Postgres")?;
            run(store, &cli).await
        }
    }
}

async fn run<S: IndicatorStore>(store: S, cli: &Cli) -> anyhow::Result<()> {
    let engine = IndicatorEngine::new(store);

    if !engine.store().course_exists(cli.course).await? {
        bail!("invalid course id {}", cli.course);
    }

    let report = match cli.timeout_secs {
        Some(secs) => {
            tokio::time::timeout(Duration::from_secs(secs), engine.build_report(cli.course))
                .await
                .with_context(|| format!("report did not finish within {secs}s"))??
        }
        None => engine.build_report(cli.course).await?,
    };

    let rendered = match cli.format {
        Format::Html => report::render_html(&report),
        Format::Markdown => report::render_markdown(&report),
        Format::Json => report::render_json(&report)?,
        Format::Csv => {
            let dir = cli
                .out
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("course-{}-indicators", cli.course)));
            let written = report::write_csv_dir(&report, &dir)?;
            info!(files = written.len(), dir = %dir.display(), "csv tables written");
            println!("Wrote {} tables to {}.", written.len(), dir.display());
            return Ok(());
        }
    };

    match &cli.out {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::faults::{Fault, FaultyStore};

    fn cli(course: i64, out: PathBuf, timeout_secs: Option<u64>) -> Cli {
        Cli {
            course,
            format: Format::Json,
            out: Some(out),
            snapshot: None,
            timeout_secs,
        }
    }

    #[tokio::test]
    async fn unknown_course_is_rejected_before_reporting() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let store = MemoryStore {
            courses: vec![2],
            ..MemoryStore::default()
        };

        let err = run(store, &cli(9, out.clone(), None)).await.unwrap_err();

        assert_eq!(err.to_string(), "invalid course id 9");
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn known_course_writes_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let store = MemoryStore {
            courses: vec![2],
            ..MemoryStore::default()
        };

        run(store, &cli(2, out.clone(), None)).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["course_id"], 2);
    }

    #[tokio::test]
    async fn deadline_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let store = FaultyStore {
            inner: MemoryStore {
                courses: vec![2],
                ..MemoryStore::default()
            },
            fault: Fault::StallUsers,
        };

        let err = run(store, &cli(2, out.clone(), Some(0))).await.unwrap_err();

        assert_eq!(err.to_string(), "report did not finish within 0s");
        assert!(!out.exists());
    }
}
