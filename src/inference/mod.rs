//! Inference module for model prediction
//!
//! This module provides:
//! - Single image prediction through the same preprocessing as training
//! - Directory-wide prediction with hit/miss statistics

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{argmax, predict, BatchPredictionStats, PredictionResult, Predictor};
