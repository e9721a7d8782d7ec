//! CLI command implementations

pub mod replay;
pub mod specs;
pub mod validate;
