mod constants;

pub mod catalog;
pub mod stats;

pub use catalog::CategoryError;
pub use constants::*;
pub use stats::*;
