//! Services shared by the consumers

pub mod aggregation;
pub mod completion;
pub mod read_model_sync;
pub mod search_index;
pub mod search_sync;
pub mod unit_of_work;

pub use aggregation::{AggregationTrigger, TriggerOutcome};
pub use completion::{CompletionDetector, ProcessingStatus};
pub use read_model_sync::ReadModelSync;
pub use search_index::{HttpSearchIndex, NoopSearchIndex, SearchAssetDocument, SearchIndex, SEARCH_ASSETS_INDEX};
pub use search_sync::SearchSyncTrigger;
pub use unit_of_work::{Scope, UnitOfWork};
