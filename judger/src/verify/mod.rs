//! Turning sandbox output into result sets and comparing them.

pub mod compare;
pub mod diff;
pub mod extract;
pub mod model;

pub use compare::{compare, compare_results};
pub use extract::extract;
pub use model::{ExtractError, Record, Scalar, StructuredResult};
