//! Enrollment aggregation: many samples in, one stable template out.

use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug, PartialEq)]
pub enum EnrollError {
    #[error("enrollment requires at least one sample")]
    NoSamples,
    #[error("sample {index} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Element-wise arithmetic mean of all samples.
///
/// No liveness or quality gating happens here; callers filter samples
/// before handing them over. Computed as a running mean in f64, so N
/// identical samples yield that sample exactly.
pub fn aggregate(samples: &[Embedding]) -> Result<Embedding, EnrollError> {
    let first = samples.first().ok_or(EnrollError::NoSamples)?;
    let dim = first.dim();

    let mut mean: Vec<f64> = first.values.iter().map(|&v| v as f64).collect();
    for (i, sample) in samples.iter().enumerate().skip(1) {
        if sample.dim() != dim {
            return Err(EnrollError::DimensionMismatch {
                index: i,
                expected: dim,
                actual: sample.dim(),
            });
        }
        let k = (i + 1) as f64;
        for (m, &v) in mean.iter_mut().zip(sample.values.iter()) {
            *m += (v as f64 - *m) / k;
        }
    }

    Ok(Embedding::new(mean.into_iter().map(|v| v as f32).collect()))
}
