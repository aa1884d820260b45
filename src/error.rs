use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenAdRecError {
    #[error("unknown feature name `{0}`")]
    UnknownFeature(String),

    #[error("feature `{0}` was requested but is not present in the encoded dataset")]
    MissingFeature(&'static str),

    #[error("unknown recurrent cell type `{0}`, expected `lstm` or `gru`")]
    UnknownCellType(String),

    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown interaction code {0}")]
    UnknownInteraction(i64),

    #[error("item {item}: field `{field}` has {len} positions, expected {expected}")]
    RaggedItem {
        item: usize,
        field: &'static str,
        len: usize,
        expected: usize,
    },

    #[error("item {item}: timestamps decrease at position {position}")]
    UnsortedTimestamps { item: usize, position: usize },

    #[error("row {row} has {len} real positions, at least 2 are required")]
    SequenceTooShort { row: usize, len: usize },

    #[error("cannot sample {requested} ads, only {available} catalog entries have positive mass")]
    IndexTooLarge { requested: usize, available: usize },

    #[error("weighted sampling failed: {0}")]
    Sampling(#[from] rand::distributions::WeightedError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenAdRecError>;
