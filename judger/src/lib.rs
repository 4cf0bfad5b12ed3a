//! A judge for SQL submissions: every query runs against a freshly seeded
//! database inside its own disposable container, and its result set is
//! compared with the one a reference query produces.

pub mod catalog;
pub mod config;
pub mod judge;
pub mod runner;
pub mod server;
pub mod util;
pub mod verify;

#[cfg(test)]
mod test;
