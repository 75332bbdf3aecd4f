//! End-to-end: train -> fetch latest checkpoint -> test, over a file store

use std::io::Write;

use dl_tracker::config::StoreConfig;
use dl_tracker::experiment::ExperimentDb;
use dl_tracker::model::Dataset;
use dl_tracker::pipeline::{self, CheckpointSource, DataSource, TestOptions, TrainOptions};
use dl_tracker::train::TrainerConfig;
use tempfile::TempDir;

fn store(dir: &TempDir) -> StoreConfig {
    StoreConfig::new(format!("file://{}", dir.path().join("db").display())).chunk_size(1024)
}

fn data() -> DataSource {
    DataSource::Synthetic {
        samples: 120,
        features: 6,
        classes: 4,
        seed: 3,
    }
}

fn train_options(dir: &TempDir) -> TrainOptions {
    TrainOptions {
        trainer: TrainerConfig {
            max_epochs: 4,
            output_dir: dir.path().join("run"),
            ..TrainerConfig::default()
        },
        data: data(),
        ..TrainOptions::default()
    }
}

#[test]
fn test_train_then_test_latest() {
    let dir = TempDir::new().unwrap();
    let outcome = pipeline::train(&train_options(&dir), &store(&dir)).unwrap();
    assert_eq!(outcome.fit.epochs, 4);
    let trained = outcome.test_metrics.unwrap();

    let metrics = pipeline::test(
        &TestOptions {
            checkpoint: CheckpointSource::Latest,
            data: data(),
            download_dir: dir.path().join("downloads"),
        },
        &store(&dir),
    )
    .unwrap();
    assert!(metrics.contains_key("test.acc"));
    assert!(metrics.contains_key("test.loss"));
    assert!(dir.path().join("downloads/latest.ckpt").exists());
    assert!(trained.contains_key("test.acc"));
}

#[test]
fn test_test_by_experiment_id_matches_local_file() {
    let dir = TempDir::new().unwrap();
    let outcome = pipeline::train(&train_options(&dir), &store(&dir)).unwrap();
    let local = outcome.fit.best_model_path.clone().unwrap();

    let from_db = pipeline::test(
        &TestOptions {
            checkpoint: CheckpointSource::Experiment(outcome.experiment_id.clone()),
            data: data(),
            download_dir: dir.path().join("downloads"),
        },
        &store(&dir),
    )
    .unwrap();
    let from_disk = pipeline::test(
        &TestOptions {
            checkpoint: CheckpointSource::Path(local),
            data: data(),
            download_dir: dir.path().join("unused"),
        },
        &store(&dir),
    )
    .unwrap();
    assert_eq!(from_db, from_disk);
}

#[test]
fn test_records_visible_from_new_connection() {
    let dir = TempDir::new().unwrap();
    let first = pipeline::train(&train_options(&dir), &store(&dir)).unwrap();
    let second = pipeline::train(&train_options(&dir), &store(&dir)).unwrap();

    let db = ExperimentDb::connect(store(&dir)).unwrap();
    let ids = db.experiment_ids(false).unwrap();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first.experiment_id));
    assert_eq!(db.last_experiment_id(false).unwrap(), Some(second.experiment_id.clone()));
    assert_eq!(db.last_checkpoint_id().unwrap(), Some(second.experiment_id));
}

#[test]
fn test_jsonl_dataset() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    for sample in Dataset::synthetic(60, 3, 2, 5).samples() {
        writeln!(file, "{}", serde_json::to_string(sample).unwrap()).unwrap();
    }
    drop(file);

    let options = TrainOptions {
        data: DataSource::Jsonl(path),
        trainer: TrainerConfig {
            max_epochs: 2,
            output_dir: dir.path().join("run"),
            ..TrainerConfig::default()
        },
        ..TrainOptions::default()
    };
    let outcome = pipeline::train(&options, &store(&dir)).unwrap();
    assert!(outcome.fit.best_model_path.is_some());
}

#[test]
fn test_test_on_empty_store_fails() {
    let dir = TempDir::new().unwrap();
    let result = pipeline::test(
        &TestOptions {
            download_dir: dir.path().join("downloads"),
            ..TestOptions::default()
        },
        &store(&dir),
    );
    assert!(matches!(result, Err(dl_tracker::Error::NotFound { .. })));
}
