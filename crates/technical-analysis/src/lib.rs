pub mod indicators;
pub mod classifiers;
pub mod analyzer;


pub use indicators::*;
pub use classifiers::*;
pub use analyzer::*;
