// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector math over embeddings

use crate::errors::{EmbedError, Result};

/// Cosine similarity clamped to `[0, 1]`.
///
/// Returns 0.0 when either vector has zero magnitude or holds a NaN or
/// infinite component.
pub fn calculate_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(EmbedError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !cosine.is_finite() {
        return Ok(0.0);
    }
    Ok(cosine.clamp(0.0, 1.0) as f32)
}

/// Elementwise arithmetic mean of equal-length vectors
pub fn mean_pool(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(EmbedError::EmptyInput);
    };

    let mut sum = vec![0.0f64; first.len()];
    for vector in vectors {
        if vector.len() != sum.len() {
            return Err(EmbedError::DimensionMismatch {
                left: sum.len(),
                right: vector.len(),
            });
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += f64::from(*value);
        }
    }

    let count = vectors.len() as f64;
    Ok(sum.into_iter().map(|value| (value / count) as f32).collect())
}
