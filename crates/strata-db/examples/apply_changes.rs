//! Feeds a day of supplier master-data changes through a history table
//! and prints the resulting views.
//!
//! The feed arrives the way change feeds do in practice: out of order,
//! with a redelivered duplicate and a deletion mixed in. The pipeline
//! sorts it out per key and keeps the full version trail.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=info cargo run -p strata-db --example apply_changes
//! ```

use std::sync::Arc;

use strata_connectors::MemorySource;
use strata_core::config::MergeConfig;
use strata_core::event::{RawChange, Row};
use strata_core::gate::QualityRule;
use strata_db::{Pipeline, PipelineOptions, TableSpec};
use strata_storage::InMemoryCheckpointStore;

fn supplier(name: &str, email: &str, tier: i64) -> Row {
    Row::new()
        .with("name", serde_json::json!(name))
        .with("email", serde_json::json!(email))
        .with("tier", serde_json::json!(tier))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let feed = vec![
        RawChange::upsert("acme", 10, supplier("Acme Corp", "ops@acme.test", 2)),
        RawChange::upsert("globex", 11, supplier("Globex", "hq@globex.test", 1)),
        // A tier upgrade arrives before the address change it supersedes.
        RawChange::upsert("acme", 14, supplier("Acme Corp", "ops@acme.test", 1)),
        RawChange::upsert("acme", 12, supplier("Acme Corp", "sales@acme.test", 2)),
        // The broker redelivers the upgrade.
        RawChange::upsert("acme", 14, supplier("Acme Corp", "ops@acme.test", 1)),
        // Globex is offboarded.
        RawChange::delete("globex", 15),
        // This one fails the email rule and is dropped by the gate.
        RawChange::upsert("initech", 16, Row::new().with("name", serde_json::json!("Initech"))),
    ];

    let table = TableSpec::new("suppliers", Box::new(MemorySource::new("crm-feed", feed)))
        .merge(MergeConfig::history())
        .rule(QualityRule::expect_or_drop("has_email", |row| {
            row.get("email").is_some()
        }))
        .rule(QualityRule::expect("known_tier", |row| {
            row.get("tier")
                .and_then(serde_json::Value::as_i64)
                .is_some_and(|t| (1..=3).contains(&t))
        }));

    let mut pipeline = Pipeline::new(
        vec![table],
        Arc::new(InMemoryCheckpointStore::new()),
        PipelineOptions::default(),
    )
    .await?;
    pipeline.run_once().await?;

    println!("current view:");
    for row in pipeline.current_view("suppliers")? {
        println!(
            "  {:<8} v{} since seq {} {}",
            row.key.as_str(),
            row.version_id,
            row.valid_from,
            serde_json::to_string(&row.payload)?
        );
    }

    println!("\nversion trail:");
    for row in pipeline.history_view("suppliers")? {
        let until = row
            .valid_to
            .map_or_else(|| "open".to_string(), |s| s.to_string());
        println!(
            "  {:<8} v{} [{} .. {}) current={}",
            row.key.as_str(),
            row.version_id,
            row.valid_from,
            until,
            row.is_current
        );
    }

    let metrics = pipeline.merge_metrics("suppliers")?;
    println!(
        "\napplied {} changes: {} duplicate, {} dropped by gate, {} stale",
        pipeline.counters().changes_applied,
        metrics.duplicates,
        metrics.gate_dropped,
        metrics.stale_skipped
    );

    pipeline.shutdown().await;
    Ok(())
}
