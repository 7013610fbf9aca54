//! Recursive research: planning, branches and the orchestrator that drives them

mod branch;
pub mod extractor;
pub mod feedback;
pub mod orchestrator;
pub mod planner;
pub mod types;

pub use extractor::{extract_learnings, Extraction};
pub use feedback::generate_feedback;
pub use orchestrator::Researcher;
pub use planner::generate_queries;
pub use types::{
    BranchResult, Learning, PlannedQuery, Progress, ProgressSink, ResearchAccumulator, ResearchRequest, Stage,
};
