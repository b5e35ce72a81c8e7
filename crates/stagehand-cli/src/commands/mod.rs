//! CLI command implementations.
//!
//! - [`suite`] - Ordered, fail-fast suite execution
//! - [`fixture`] - One cluster fixture from a scenario plan

pub mod fixture;
pub mod suite;

pub use fixture::FixtureCommand;
pub use suite::SuiteCommand;
