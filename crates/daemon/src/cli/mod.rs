pub mod args;
pub mod op;
pub mod ops;

pub use ops::{Ls, Probe, Run, Version};
