//! Iterative, LLM-guided web research.
//!
//! [`DeepResearcher`] plans search queries, fetches and condenses pages into
//! learnings, decides whether to go deeper, and finally writes a Markdown
//! report. Search, page loading and the language model are traits so each
//! can be swapped independently.

pub mod budget;
pub mod config;
pub mod error;
pub mod models;
pub mod server;
pub mod session;
pub mod tasks;
pub mod tools;

pub use budget::TextBudgeter;
pub use error::{FetchError, LlmError, ResearchError, SearchError};
pub use models::{Learning, ResearchOutcome};
pub use session::{ResearchPhase, ResearchSession};
pub use tasks::{DeepResearcher, LlmResearchModel, ResearchModel, ResearchOptions};
