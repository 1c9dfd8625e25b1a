//! WarpCTC bindings for burn: marshaling of negative-padded label matrices,
//! native (or reference) CTC evaluation, and the loss as a differentiable op.

pub mod burn_ext;
pub mod engine;
pub mod error;
pub mod marshal;
pub mod node;
pub mod parse_config;

pub use engine::{CtcEngine, CtcOptions, ReferenceCtc};
#[cfg(feature = "warpctc")]
pub use engine::WarpCtc;
pub use error::CtcError;
pub use node::{CtcForward, CtcGradState, CtcNode, DType, HostData, NodeInput, WarpCtcOp};
