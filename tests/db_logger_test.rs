//! DbLogger lifecycle tests driven through the Trainer

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dl_tracker::blob::MemoryChunkBackend;
use dl_tracker::config::StoreConfig;
use dl_tracker::experiment::ExperimentDb;
use dl_tracker::model::{Classifier, ClassifierConfig, Dataset};
use dl_tracker::store::{Document, DocumentStore, MemoryDocumentStore};
use dl_tracker::train::{DbLogger, Trainer, TrainerConfig};
use dl_tracker::{Error, Result};
use tempfile::TempDir;

fn model() -> Classifier {
    Classifier::new(ClassifierConfig {
        in_features: 4,
        output_size: 3,
        ..ClassifierConfig::default()
    })
    .unwrap()
}

fn data() -> (Dataset, Dataset) {
    Dataset::synthetic(90, 4, 3, 11).split(0.3, 0)
}

fn run(config: TrainerConfig, db: &Arc<ExperimentDb>) -> Result<String> {
    let (train, val) = data();
    let mut trainer = Trainer::new(config)?;
    let mut logger = DbLogger::new(Arc::clone(db));
    trainer.fit(&mut model(), &train, &val, &mut [&mut logger])?;
    Ok(logger.experiment_id().unwrap().to_string())
}

// =============================================================================
// Full run
// =============================================================================

#[test]
fn test_full_run_record() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(ExperimentDb::in_memory());
    let config = TrainerConfig {
        max_epochs: 4,
        check_val_every_n_epoch: 2,
        output_dir: dir.path().to_path_buf(),
        ..TrainerConfig::default()
    };
    let id = run(config.clone(), &db).unwrap();

    let record = db.find_experiment(&id, false).unwrap().unwrap();
    assert_eq!(
        record.checkpoints_path(),
        config.checkpoint_dir().to_string_lossy()
    );
    // Validation ran after epochs 1 and 3 only
    assert_eq!(record.epoch_results().keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    for result in record.epoch_results().values() {
        assert!(result.train("loss").is_some());
        assert!(result.eval("acc").is_some());
        assert!(result.train_results.keys().all(|k| !k.contains('.')));
        assert!(result.epoch_time >= 0.0);
    }

    assert!(record.experiment_duration().unwrap() >= 0.0);
    assert_eq!(record.learning_rates()["lr-SGD"].len(), 4);
    let lrs = &record.learning_rates()["lr-SGD"];
    assert!(lrs.windows(2).all(|w| w[1] < w[0]));
    assert_eq!(record.config().unwrap()["output_size"], 3);

    let model_path = record.trained_model_path().unwrap();
    assert!(model_path.ends_with(".ckpt"));
    assert_eq!(db.last_checkpoint_id().unwrap().as_deref(), Some(id.as_str()));

    let (_, bytes) = db.blobs().get_bytes(&id).unwrap();
    assert_eq!(bytes, std::fs::read(model_path).unwrap());
}

#[test]
fn test_fast_dev_run_does_not_upload() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(ExperimentDb::in_memory());
    let id = run(
        TrainerConfig {
            fast_dev_run: true,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        },
        &db,
    )
    .unwrap();

    let record = db.find_experiment(&id, false).unwrap().unwrap();
    assert_eq!(record.epoch_results().len(), 1);
    assert_eq!(record.trained_model_path(), Some(""));
    assert!(db.last_checkpoint_id().unwrap().is_none());
}

#[test]
fn test_sanity_check_goes_to_sanity_collection() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(ExperimentDb::in_memory());
    let id = run(
        TrainerConfig {
            sanity_check: true,
            sanity_samples: 8,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        },
        &db,
    )
    .unwrap();

    assert!(db.find_document(&id, false).unwrap().is_none());
    let record = db.find_experiment(&id, true).unwrap().unwrap();
    assert_eq!(record.epoch_results().len(), 1);
}

// =============================================================================
// Failure propagation
// =============================================================================

/// Memory store whose updates fail after `ok_updates` successes.
struct FlakyStore {
    inner: MemoryDocumentStore,
    ok_updates: usize,
    updates: AtomicUsize,
}

impl DocumentStore for FlakyStore {
    fn insert(&self, collection: &str, id: &str, document: Document) -> Result<()> {
        self.inner.insert(collection, id, document)
    }

    fn find(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.inner.find(collection, id)
    }

    fn set_fields(&self, collection: &str, id: &str, fields: &Document) -> Result<bool> {
        if self.updates.fetch_add(1, Ordering::SeqCst) >= self.ok_updates {
            return Err(Error::StorageError("connection reset".to_string()));
        }
        self.inner.set_fields(collection, id, fields)
    }

    fn ids(&self, collection: &str) -> Result<Vec<String>> {
        self.inner.ids(collection)
    }
}

#[test]
fn test_storage_failure_aborts_fit() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FlakyStore {
        inner: MemoryDocumentStore::new(),
        ok_updates: 2,
        updates: AtomicUsize::new(0),
    });
    let db = Arc::new(ExperimentDb::with_backends(
        StoreConfig::default(),
        store.clone(),
        Arc::new(MemoryChunkBackend::new()),
    ));

    let err = run(
        TrainerConfig {
            max_epochs: 5,
            output_dir: dir.path().to_path_buf(),
            ..TrainerConfig::default()
        },
        &db,
    )
    .unwrap_err();
    assert!(matches!(err, Error::StorageError(_)));
    // hparams + epoch 0 succeeded, epoch 1 failed, nothing after
    assert_eq!(store.updates.load(Ordering::SeqCst), 3);
    assert!(db.last_checkpoint_id().unwrap().is_none());
}
