use log::warn;

use super::{CtcBatch, CtcEngine, CtcOptions, CtcOutput};
use crate::error::CtcError;

/// CPU implementation of the CTC loss with WarpCTC's contract: softmax is
/// applied to the activations internally and gradients are taken with respect
/// to the pre-softmax activations.
///
/// # Reference
///
/// - [Connectionist Temporal Classification: Labelling Unsegmented Sequence Data with Recurrent Neural Networks](https://www.cs.toronto.edu/~graves/icml_2006.pdf)
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceCtc {
    options: CtcOptions,
}

impl ReferenceCtc {
    pub fn new(options: CtcOptions) -> Self {
        Self { options }
    }
}

impl CtcEngine for ReferenceCtc {
    fn options(&self) -> CtcOptions {
        self.options
    }

    fn compute(&self, batch: &CtcBatch<'_>, want_gradients: bool) -> Result<CtcOutput, CtcError> {
        batch.validate(&self.options)?;

        let blank = self.options.blank_label as usize;
        let mut costs = Vec::with_capacity(batch.minibatch);
        let mut gradients = want_gradients.then(|| vec![0.0f32; batch.activations.len()]);

        let mut start = 0usize;
        for b in 0..batch.minibatch {
            let label_length = batch.label_lengths[b] as usize;
            let labels = &batch.flat_labels[start..(start + label_length)];
            start += label_length;

            let input_length = batch.input_lengths[b] as usize;
            let repeats = labels.windows(2).filter(|pair| pair[0] == pair[1]).count();

            if input_length == 0 || label_length + repeats > input_length {
                if label_length + repeats > input_length {
                    warn!(
                        "sequence {} with {} labels ({} repeats) cannot align to {} frames",
                        b, label_length, repeats, input_length
                    );
                }
                costs.push(0.0);
                continue;
            }

            let sequence = Sequence::new(batch, b, labels, blank, input_length);
            let log_alphas = sequence.log_alphas();
            let log_likelihood = sequence.log_likelihood(&log_alphas);
            costs.push(-log_likelihood as f32);

            if let Some(gradients) = gradients.as_mut() {
                let log_betas = sequence.log_betas();
                sequence.write_gradients(&log_alphas, &log_betas, log_likelihood, gradients);
            }
        }

        Ok(CtcOutput { costs, gradients })
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }

    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// One sequence of the batch with its blank-interleaved target.
struct Sequence {
    // [input_length, alphabet_size]
    log_probs: Vec<f64>,
    target_primes: Vec<usize>,
    blank: usize,
    input_length: usize,
    alphabet_size: usize,
    batch_idx: usize,
    minibatch: usize,
}

impl Sequence {
    fn new(
        batch: &CtcBatch<'_>,
        batch_idx: usize,
        labels: &[i32],
        blank: usize,
        input_length: usize,
    ) -> Self {
        let alphabet_size = batch.alphabet_size;
        let mut log_probs = Vec::with_capacity(input_length * alphabet_size);

        for t in 0..input_length {
            let offset = (t * batch.minibatch + batch_idx) * alphabet_size;
            let frame = &batch.activations[offset..(offset + alphabet_size)];
            let max = frame.iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v as f64));
            let log_norm = frame
                .iter()
                .map(|&v| (v as f64 - max).exp())
                .sum::<f64>()
                .ln()
                + max;
            log_probs.extend(frame.iter().map(|&v| v as f64 - log_norm));
        }

        let mut target_primes = Vec::with_capacity(2 * labels.len() + 1);
        target_primes.push(blank);
        for &label in labels {
            target_primes.push(label as usize);
            target_primes.push(blank);
        }

        Self {
            log_probs,
            target_primes,
            blank,
            input_length,
            alphabet_size,
            batch_idx,
            minibatch: batch.minibatch,
        }
    }

    fn log_prob(&self, t: usize, s: usize) -> f64 {
        self.log_probs[t * self.alphabet_size + self.target_primes[s]]
    }

    // s -> s + 2 skips a blank, allowed only between two different labels
    fn can_skip(&self, from: usize, to: usize) -> bool {
        let target = self.target_primes[to];
        target != self.blank && target != self.target_primes[from]
    }

    /// \alpha_t(s), including the emission at t.
    fn log_alphas(&self) -> Vec<f64> {
        let width = self.target_primes.len();
        let mut log_alphas = vec![f64::NEG_INFINITY; self.input_length * width];

        log_alphas[0] = self.log_prob(0, 0);
        if width > 1 {
            log_alphas[1] = self.log_prob(0, 1);
        }

        for t in 1..self.input_length {
            let prev = (t - 1) * width;
            for s in 0..width {
                let mut la = log_alphas[prev + s];
                if s >= 1 {
                    la = log_sum_exp(la, log_alphas[prev + s - 1]);
                }
                if s >= 2 && self.can_skip(s - 2, s) {
                    la = log_sum_exp(la, log_alphas[prev + s - 2]);
                }
                log_alphas[t * width + s] = la + self.log_prob(t, s);
            }
        }

        log_alphas
    }

    /// \beta_t(s), excluding the emission at t.
    fn log_betas(&self) -> Vec<f64> {
        let width = self.target_primes.len();
        let last = self.input_length - 1;
        let mut log_betas = vec![f64::NEG_INFINITY; self.input_length * width];

        log_betas[last * width + width - 1] = 0.0;
        if width > 1 {
            log_betas[last * width + width - 2] = 0.0;
        }

        for t in (0..last).rev() {
            let next = (t + 1) * width;
            for s in 0..width {
                let mut lb = log_betas[next + s] + self.log_prob(t + 1, s);
                if s + 1 < width {
                    lb = log_sum_exp(lb, log_betas[next + s + 1] + self.log_prob(t + 1, s + 1));
                }
                if s + 2 < width && self.can_skip(s, s + 2) {
                    lb = log_sum_exp(lb, log_betas[next + s + 2] + self.log_prob(t + 1, s + 2));
                }
                log_betas[t * width + s] = lb;
            }
        }

        log_betas
    }

    fn log_likelihood(&self, log_alphas: &[f64]) -> f64 {
        let width = self.target_primes.len();
        let last = (self.input_length - 1) * width;

        let l1 = log_alphas[last + width - 1];
        let l2 = if width > 1 {
            log_alphas[last + width - 2]
        } else {
            f64::NEG_INFINITY
        };

        log_sum_exp(l1, l2)
    }

    fn write_gradients(
        &self,
        log_alphas: &[f64],
        log_betas: &[f64],
        log_likelihood: f64,
        gradients: &mut [f32],
    ) {
        let width = self.target_primes.len();
        let mut occupancy = vec![f64::NEG_INFINITY; self.alphabet_size];

        for t in 0..self.input_length {
            occupancy.fill(f64::NEG_INFINITY);
            for s in 0..width {
                let c = self.target_primes[s];
                occupancy[c] = log_sum_exp(
                    occupancy[c],
                    log_alphas[t * width + s] + log_betas[t * width + s],
                );
            }

            let offset = (t * self.minibatch + self.batch_idx) * self.alphabet_size;
            for c in 0..self.alphabet_size {
                let prob = self.log_probs[t * self.alphabet_size + c].exp();
                let posterior = (occupancy[c] - log_likelihood).exp();
                gradients[offset + c] = (prob - posterior) as f32;
            }
        }
    }
}
