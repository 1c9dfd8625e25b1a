pub mod backend;
pub mod ctc;
