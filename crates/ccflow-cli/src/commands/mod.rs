pub mod package;
pub mod policy;
pub mod simulate;
