//! # Deep Research
//!
//! A recursive research agent. Given a question it plans search queries,
//! retrieves web pages and PubMed records, distills them into learnings with
//! a language model, recurses into narrower follow-up branches until the
//! depth budget runs out, and writes a cited report.
//!
//! ```text
//! Researcher::start_research
//!   └─ level: plan queries ─► N × branch (search ─► extract ─► [child level])
//!                           ─► aggregate
//! report::write_report
//! ```
//!
//! Every structured model call goes through [`recovery`], so malformed model
//! output never aborts a run. Branch failures shrink the explored tree; only
//! a failed report is fatal.

pub mod budget;
pub mod config;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod recovery;
pub mod report;
pub mod research;
pub mod search;

pub use config::Config;
pub use error::{LlmError, RecoveryError, ResearchError, SearchError};
pub use llm::{GenerationOptions, LanguageModel, RigLanguageModel};
pub use report::{write_answer, write_report};
pub use research::{Learning, Progress, ResearchAccumulator, ResearchRequest, Researcher, Stage};
pub use search::{BiomedicalSearch, PubMedSearch, Restrictiveness, TavilySearch, WebSearch};
