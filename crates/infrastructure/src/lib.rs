pub mod dataset_store;
pub mod engine;
pub mod journal;

pub use dataset_store::{
    datasets_dir, read_dataset_def, DatasetStoreFactory, FileSystemDatasetStore,
    MemoryDatasetStore,
};
pub use engine::RangeDatasetEngine;
pub use journal::{
    journal_dir, FileJournalReader, FileJournalWriter, JournalReader, JournalWriter,
};
