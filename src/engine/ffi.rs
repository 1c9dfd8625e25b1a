//! Raw declarations of WarpCTC's C API (`ctc.h`).
//!
//! Use [`super::WarpCtc`] instead of calling these directly.

use std::ffi::c_void;
use std::os::raw::{c_char, c_int, c_uint};

pub type CtcStatus = c_int;

pub const CTC_STATUS_SUCCESS: CtcStatus = 0;

pub const CTC_CPU: c_int = 0;

#[repr(C)]
#[derive(Clone, Copy)]
pub union CtcOptionsUnion {
    pub num_threads: c_uint,
    pub stream: *mut c_void,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct CtcOptionsRaw {
    pub loc: c_int,
    pub threads_or_stream: CtcOptionsUnion,
    pub blank_label: c_int,
}

extern "C" {
    pub fn get_warpctc_version() -> c_int;

    pub fn ctcGetStatusString(status: CtcStatus) -> *const c_char;

    pub fn compute_ctc_loss(
        activations: *const f32,
        gradients: *mut f32,
        flat_labels: *const c_int,
        label_lengths: *const c_int,
        input_lengths: *const c_int,
        alphabet_size: c_int,
        minibatch: c_int,
        costs: *mut f32,
        workspace: *mut c_void,
        options: CtcOptionsRaw,
    ) -> CtcStatus;

    pub fn get_workspace_size(
        label_lengths: *const c_int,
        input_lengths: *const c_int,
        alphabet_size: c_int,
        minibatch: c_int,
        info: CtcOptionsRaw,
        size_bytes: *mut usize,
    ) -> CtcStatus;
}
