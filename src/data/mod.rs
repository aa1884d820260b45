pub mod batch;
pub mod catalog;
pub mod features;
pub mod sequences;

pub use batch::{AdBatch, TaobaoInteractionsSeqBatch, UserBatch};
pub use catalog::{AdCatalog, AdCatalogRow};
pub use features::{
    AdFeature, AdFeatureSet, CategoricalFeature, Feature, FeatureSet, Interaction, UserFeature,
    UserFeatureSet,
};
pub use sequences::{
    SequenceBatcher, SequenceBatcherConfig, TaobaoSequenceDataset, TaobaoSequenceItem,
};
