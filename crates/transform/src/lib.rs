pub mod aggregator;
pub mod attribute_engine;
pub mod error;
pub mod makers;
pub mod metrics;
pub mod pipeline;
pub mod segment_tree;
pub mod sql;
pub mod transformer;

pub use aggregator::{Aggregator, Aggregators, ChannelAggregator, RecordingAggregators};
pub use error::{Result, TransformError};
pub use pipeline::{PipelineConfig, PipelineStats, TransformPipeline};
pub use transformer::{TransactionTransformer, TransformOutcome};
