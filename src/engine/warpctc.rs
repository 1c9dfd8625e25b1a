use std::ffi::{c_void, CStr};
use std::os::raw::c_int;

use log::debug;

use super::ffi;
use super::{CtcBatch, CtcEngine, CtcOptions, CtcOutput};
use crate::error::CtcError;

/// The native WarpCTC library, run on the CPU.
#[derive(Clone, Copy, Debug, Default)]
pub struct WarpCtc {
    options: CtcOptions,
}

impl WarpCtc {
    pub fn new(options: CtcOptions) -> Self {
        Self { options }
    }

    pub fn version() -> i32 {
        unsafe { ffi::get_warpctc_version() }
    }

    fn raw_options(&self) -> ffi::CtcOptionsRaw {
        ffi::CtcOptionsRaw {
            loc: ffi::CTC_CPU,
            threads_or_stream: ffi::CtcOptionsUnion {
                num_threads: self.options.num_threads,
            },
            blank_label: self.options.blank_label,
        }
    }
}

fn check(status: ffi::CtcStatus) -> Result<(), CtcError> {
    if status == ffi::CTC_STATUS_SUCCESS {
        return Ok(());
    }

    let message = unsafe {
        let ptr = ffi::ctcGetStatusString(status);
        if ptr.is_null() {
            String::from("unknown error")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    };

    Err(CtcError::Native { status, message })
}

fn to_c_int(value: usize, what: &str) -> Result<c_int, CtcError> {
    c_int::try_from(value)
        .map_err(|_| CtcError::InvalidBatch(format!("{} {} does not fit a C int", what, value)))
}

impl CtcEngine for WarpCtc {
    fn options(&self) -> CtcOptions {
        self.options
    }

    fn compute(&self, batch: &CtcBatch<'_>, want_gradients: bool) -> Result<CtcOutput, CtcError> {
        batch.validate(&self.options)?;

        let alphabet_size = to_c_int(batch.alphabet_size, "alphabet size")?;
        let minibatch = to_c_int(batch.minibatch, "minibatch")?;
        let options = self.raw_options();

        let mut size_bytes = 0usize;
        check(unsafe {
            ffi::get_workspace_size(
                batch.label_lengths.as_ptr(),
                batch.input_lengths.as_ptr(),
                alphabet_size,
                minibatch,
                options,
                &mut size_bytes,
            )
        })?;
        debug!("warpctc workspace of {} bytes", size_bytes);

        // f32 elements keep the workspace float aligned
        let mut workspace = vec![0f32; size_bytes.div_ceil(std::mem::size_of::<f32>())];
        let mut costs = vec![0f32; batch.minibatch];
        let mut gradients = want_gradients.then(|| vec![0f32; batch.activations.len()]);
        let gradients_ptr = gradients
            .as_mut()
            .map_or(std::ptr::null_mut(), |grads| grads.as_mut_ptr());

        check(unsafe {
            ffi::compute_ctc_loss(
                batch.activations.as_ptr(),
                gradients_ptr,
                batch.flat_labels.as_ptr(),
                batch.label_lengths.as_ptr(),
                batch.input_lengths.as_ptr(),
                alphabet_size,
                minibatch,
                costs.as_mut_ptr(),
                workspace.as_mut_ptr() as *mut c_void,
                options,
            )
        })?;

        Ok(CtcOutput { costs, gradients })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::ReferenceCtc;

    #[test]
    fn test_matches_reference() {
        let acts = [0.1, 0.6, 0.1, 0.1, 0.1, 0.1, 0.1, 0.6, 0.1, 0.1];
        let batch = CtcBatch {
            activations: &acts,
            flat_labels: &[1, 2],
            label_lengths: &[2],
            input_lengths: &[2],
            max_time: 2,
            minibatch: 1,
            alphabet_size: 5,
        };

        let native = WarpCtc::default().compute(&batch, true).unwrap();
        let reference = ReferenceCtc::default().compute(&batch, true).unwrap();

        assert!((native.costs[0] - reference.costs[0]).abs() < 1e-4);
        for (a, b) in native
            .gradients
            .unwrap()
            .iter()
            .zip(reference.gradients.unwrap().iter())
        {
            assert!((a - b).abs() < 1e-4);
        }
    }
}
