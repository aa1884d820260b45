//! Next-ad recommendation over Taobao interaction sequences.
//!
//! Sequences of (ad, action) pairs are encoded by a recurrent network and
//! trained with a sampled softmax corrected for the ads' sampling frequency.

pub mod data;
pub mod error;
pub mod loss;
pub mod models;
pub mod modules;
pub mod utils;

pub use error::{GenAdRecError, Result};
pub use models::seq::{RNNSeqModel, RNNSeqModelConfig};
