//! Engines computing CTC costs and activation gradients from packed buffers.

mod reference;
#[cfg(feature = "warpctc")]
mod ffi;
#[cfg(feature = "warpctc")]
mod warpctc;

pub use reference::ReferenceCtc;
#[cfg(feature = "warpctc")]
pub use warpctc::WarpCtc;

use crate::error::CtcError;

/// Options shared by all engines, mirroring WarpCTC's `ctcOptions` on the CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CtcOptions {
    pub blank_label: i32,
    pub num_threads: u32,
}

impl Default for CtcOptions {
    fn default() -> Self {
        Self {
            blank_label: 0,
            num_threads: 1,
        }
    }
}

/// Packed inputs of one engine call.
///
/// `activations` is laid out as `[max_time, minibatch, alphabet_size]` and holds
/// pre-softmax values.
#[derive(Clone, Copy, Debug)]
pub struct CtcBatch<'a> {
    pub activations: &'a [f32],
    pub flat_labels: &'a [i32],
    pub label_lengths: &'a [i32],
    pub input_lengths: &'a [i32],
    pub max_time: usize,
    pub minibatch: usize,
    pub alphabet_size: usize,
}

impl<'a> CtcBatch<'a> {
    pub fn validate(&self, options: &CtcOptions) -> Result<(), CtcError> {
        let expected = self.max_time * self.minibatch * self.alphabet_size;
        if self.activations.len() != expected {
            return Err(CtcError::InvalidBatch(format!(
                "{} activations given for shape [{}, {}, {}]",
                self.activations.len(),
                self.max_time,
                self.minibatch,
                self.alphabet_size
            )));
        }

        if self.label_lengths.len() != self.minibatch || self.input_lengths.len() != self.minibatch
        {
            return Err(CtcError::InvalidBatch(format!(
                "{} label lengths and {} input lengths given for a minibatch of {}",
                self.label_lengths.len(),
                self.input_lengths.len(),
                self.minibatch
            )));
        }

        let total_labels: i64 = self.label_lengths.iter().map(|&len| len as i64).sum();
        if self.label_lengths.iter().any(|&len| len < 0)
            || total_labels != self.flat_labels.len() as i64
        {
            return Err(CtcError::InvalidBatch(format!(
                "label lengths sum to {} but {} labels given",
                total_labels,
                self.flat_labels.len()
            )));
        }

        if let Some(&len) = self
            .input_lengths
            .iter()
            .find(|&&len| len < 0 || len as usize > self.max_time)
        {
            return Err(CtcError::InvalidBatch(format!(
                "input length {} outside of [0, {}]",
                len, self.max_time
            )));
        }

        if let Some(&label) = self
            .flat_labels
            .iter()
            .find(|&&label| label < 0 || label as usize >= self.alphabet_size)
        {
            return Err(CtcError::InvalidBatch(format!(
                "label {} outside of an alphabet of {}",
                label, self.alphabet_size
            )));
        }

        if options.blank_label < 0 || options.blank_label as usize >= self.alphabet_size {
            return Err(CtcError::InvalidBatch(format!(
                "blank label {} outside of an alphabet of {}",
                options.blank_label, self.alphabet_size
            )));
        }

        Ok(())
    }
}

/// Output of one engine call; `gradients` has the activations' layout.
#[derive(Clone, Debug, PartialEq)]
pub struct CtcOutput {
    pub costs: Vec<f32>,
    pub gradients: Option<Vec<f32>>,
}

pub trait CtcEngine {
    fn options(&self) -> CtcOptions;

    /// Computes one cost per sequence, and the gradient of each cost with
    /// respect to the activations when `want_gradients` is set.
    fn compute(&self, batch: &CtcBatch<'_>, want_gradients: bool) -> Result<CtcOutput, CtcError>;
}

impl<E: CtcEngine + ?Sized> CtcEngine for &E {
    fn options(&self) -> CtcOptions {
        (**self).options()
    }

    fn compute(&self, batch: &CtcBatch<'_>, want_gradients: bool) -> Result<CtcOutput, CtcError> {
        (**self).compute(batch, want_gradients)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn batch<'a>(
        acts: &'a [f32],
        labels: &'a [i32],
        lengths: &'a [i32],
        inputs: &'a [i32],
    ) -> CtcBatch<'a> {
        CtcBatch {
            activations: acts,
            flat_labels: labels,
            label_lengths: lengths,
            input_lengths: inputs,
            max_time: 2,
            minibatch: 1,
            alphabet_size: 3,
        }
    }

    #[test]
    fn test_validate() {
        let acts = [0.0; 6];
        let options = CtcOptions::default();

        assert!(batch(&acts, &[1, 2], &[2], &[2]).validate(&options).is_ok());
        assert!(batch(&acts[..5], &[1, 2], &[2], &[2]).validate(&options).is_err());
        assert!(batch(&acts, &[1, 2], &[1], &[2]).validate(&options).is_err());
        assert!(batch(&acts, &[1, 2], &[2], &[3]).validate(&options).is_err());
        assert!(batch(&acts, &[1, 3], &[2], &[2]).validate(&options).is_err());

        let options = CtcOptions {
            blank_label: 3,
            ..Default::default()
        };
        assert!(matches!(
            batch(&acts, &[1, 2], &[2], &[2]).validate(&options),
            Err(CtcError::InvalidBatch(_))
        ));
    }
}
