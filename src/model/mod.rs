pub mod candidates;
pub mod edge;
pub mod poisson;
pub mod probability;

pub use candidates::{generate_candidates, CandidateFilter, CandidateSelection, FixtureContext};
pub use probability::{estimate, shrink, Adjustments, DataQuality, Estimate};
