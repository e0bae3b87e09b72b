//! CLI ingestion: run a local screenshot through the pipeline.
//!
//! `stepboard ingest` behaves like an HTTP upload: the file is copied into
//! the upload dir, read, and reconciled against the person's record for
//! today.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::extract::ExtractionMode;
use crate::migrate;
use crate::models::UploadSource;
use crate::pipeline::{StepPipeline, Upload, UploadOutcome};
use crate::reconcile::Decision;
use crate::store::sqlite::SqliteRecordStore;
use crate::upload;

pub async fn run_ingest(
    config: &Config,
    image: &Path,
    person: &str,
    source: UploadSource,
    json: bool,
) -> Result<()> {
    let person = upload::validate_person(person)?;
    let stored = upload::import_file(&config.uploads.dir, image).await?;

    let pool = db::connect(config).await?;
    migrate::migrate_pool(&pool).await?;
    let pipeline = StepPipeline::from_config(config, Arc::new(SqliteRecordStore::new(pool.clone())));

    let outcome = pipeline
        .process(&Upload {
            person,
            image: stored,
            source,
            received_at: chrono::Local::now().naive_local(),
        })
        .await;
    pool.close().await;

    let outcome = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", format_outcome(&outcome));
    }
    Ok(())
}

fn format_outcome(outcome: &UploadOutcome) -> String {
    let mut out = String::new();
    out.push_str(&format!("person: {}\n", outcome.person));
    out.push_str(&format!("source: {}\n", outcome.source));
    out.push_str(&format!("image: {}\n", outcome.image));
    out.push_str(&format!(
        "steps: {} ({}, {:?})\n",
        outcome.steps, outcome.extractor, outcome.confidence
    ));
    let detail = match outcome.decision {
        Decision::Inserted { id } => format!("record {}", id),
        Decision::Updated { id, previous_steps } => {
            format!("record {}, was {}", id, previous_steps)
        }
        Decision::Ignored { id, kept_steps } => format!("record {} keeps {}", id, kept_steps),
        Decision::Rejected => "zero readings are not stored".to_string(),
    };
    out.push_str(&format!("decision: {} ({})\n", outcome.decision.label(), detail));
    out
}

/// `stepboard extract`: run extraction on literal OCR fragments.
pub fn run_extract(source: UploadSource, fragments: &[String]) {
    let mode: ExtractionMode = source.extraction_mode();
    let extractor = mode.extractor();
    let text = crate::normalize::join_tokens(fragments);
    let result = extractor.extract(&text);

    println!("steps: {}", result.steps);
    println!("confidence: {:?}", result.confidence);
    if let Some(rejected) = result.rejected {
        println!("rejected: {}", rejected);
    }
}
