//! Experiment database tests: record lifecycle, ordering, collections

use std::path::Path;

use chrono::NaiveDate;
use dl_tracker::config::StoreConfig;
use dl_tracker::experiment::{ExperimentDb, ExperimentId};
use dl_tracker::store::Document;
use dl_tracker::Error;
use serde_json::json;
use tempfile::TempDir;

fn id_at(h: u32, m: u32, s: u32, micro: u32) -> ExperimentId {
    let at = NaiveDate::from_ymd_opt(2024, 3, 15)
        .unwrap()
        .and_hms_micro_opt(h, m, s, micro)
        .unwrap();
    ExperimentId::from_datetime(at)
}

// =============================================================================
// Record round trip
// =============================================================================

#[test]
fn test_update_merges_without_disturbing_other_fields() {
    let db = ExperimentDb::in_memory();
    let id = id_at(10, 0, 0, 0);
    db.setup_experiment_entry(Path::new("/runs/checkpoints"), id.as_str(), false)
        .unwrap();

    let mut fields = Document::new();
    fields.insert("config".to_string(), json!({"lr": 0.01, "batch_size": 32}));
    assert!(db.insert_dict(id.as_str(), fields, false).unwrap());

    db.set_field(
        id.as_str(),
        "epoch_results.0",
        json!({"train_results": {"loss": 0.9}, "eval_results": {"acc": 0.5}, "epoch_time": 1.0}),
        false,
    )
    .unwrap();

    let record = db.find_experiment(id.as_str(), false).unwrap().unwrap();
    assert_eq!(record.experiment_id(), id.as_str());
    assert_eq!(record.checkpoints_path(), "/runs/checkpoints");
    assert_eq!(record.config(), Some(&json!({"lr": 0.01, "batch_size": 32})));
    assert_eq!(record.epoch_results()[&0].eval("acc"), Some(0.5));
    assert!(record.experiment_duration().is_none());
}

#[test]
fn test_nested_updates_keep_earlier_epochs() {
    let db = ExperimentDb::in_memory();
    db.setup_experiment_entry(Path::new("/c"), "run", false).unwrap();
    for epoch in 0..3 {
        db.set_field(
            "run",
            format!("epoch_results.{epoch}"),
            json!({"train_results": {}, "eval_results": {"acc": f64::from(epoch) / 10.0}, "epoch_time": 0.1}),
            false,
        )
        .unwrap();
    }
    let record = db.find_experiment("run", false).unwrap().unwrap();
    assert_eq!(record.epoch_results().len(), 3);
    assert_eq!(record.best_epoch("acc", true).map(|(e, _)| e), Some(2));
}

#[test]
fn test_duplicate_id_rejected() {
    let db = ExperimentDb::in_memory();
    db.setup_experiment_entry(Path::new("/c"), "dup", false).unwrap();
    let err = db
        .setup_experiment_entry(Path::new("/c"), "dup", false)
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateId { .. }));
}

#[test]
fn test_update_missing_id_is_noop() {
    let db = ExperimentDb::in_memory();
    assert!(!db.set_field("nope", "config", json!({}), false).unwrap());
    assert!(db.experiment_ids(false).unwrap().is_empty());
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_last_experiment_is_most_recent() {
    let db = ExperimentDb::in_memory();
    let ids = [
        id_at(9, 59, 59, 999_999),
        id_at(10, 0, 0, 1),
        id_at(10, 0, 0, 0),
    ];
    for id in &ids {
        db.setup_experiment_entry(Path::new("/c"), id.as_str(), false)
            .unwrap();
    }
    assert_eq!(
        db.last_experiment_id(false).unwrap().as_deref(),
        Some(ids[1].as_str())
    );
    let listed = db.experiment_ids(false).unwrap();
    assert_eq!(listed.len(), 3);
    assert!(listed.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_empty_database_has_no_last() {
    let db = ExperimentDb::in_memory();
    assert!(db.last_experiment_id(false).unwrap().is_none());
    assert!(db.last_experiment_id(true).unwrap().is_none());
}

// =============================================================================
// Sanity-check collection
// =============================================================================

#[test]
fn test_sanity_runs_use_separate_collection() {
    let db = ExperimentDb::in_memory();
    db.setup_experiment_entry(Path::new("/c"), "normal", false)
        .unwrap();
    db.setup_experiment_entry(Path::new("/c"), "sanity", true)
        .unwrap();

    assert_eq!(db.experiment_ids(false).unwrap(), vec!["normal"]);
    assert_eq!(db.experiment_ids(true).unwrap(), vec!["sanity"]);
    assert!(!db.set_field("sanity", "x", json!(1), false).unwrap());
    assert!(db.set_field("sanity", "x", json!(1), true).unwrap());
    assert_eq!(db.collection(false), "dl_template");
    assert_eq!(db.collection(true), "dl_template_sanity_checks");
}

// =============================================================================
// File backend persistence
// =============================================================================

#[test]
fn test_file_backend_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::new(format!("file://{}", dir.path().display()));
    let ckpt = dir.path().join("best.ckpt");
    std::fs::write(&ckpt, b"weights").unwrap();

    {
        let db = ExperimentDb::connect(config.clone()).unwrap();
        db.setup_experiment_entry(Path::new("/c"), "persisted", false)
            .unwrap();
        db.set_field("persisted", "experiment_duration", json!(12.5), false)
            .unwrap();
        db.save_checkpoint("persisted", &ckpt).unwrap().unwrap();
    }

    let db = ExperimentDb::connect(config).unwrap();
    let record = db.find_experiment("persisted", false).unwrap().unwrap();
    assert_eq!(record.experiment_duration(), Some(12.5));

    let dest = dir.path().join("out/restored.ckpt");
    let info = db.load_checkpoint(&dest, None).unwrap();
    assert_eq!(info.id(), "persisted");
    assert_eq!(std::fs::read(dest).unwrap(), b"weights");
}

#[test]
fn test_missing_local_checkpoint_is_skipped() {
    let db = ExperimentDb::in_memory();
    let saved = db
        .save_checkpoint("run", Path::new("/definitely/not/here.ckpt"))
        .unwrap();
    assert!(saved.is_none());
    assert!(db.last_checkpoint_id().unwrap().is_none());
}
