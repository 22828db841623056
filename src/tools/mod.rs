pub mod fetcher;
pub mod llm;
pub mod search;
pub mod tavily;

pub use fetcher::{ContentFetcher, HttpPageLoader, PageLoader};
pub use llm::{LlmBackend, LlmProvider, LlmRequest, RigBackend};
pub use search::{DuckDuckGoSearch, SafeSearch, SearchGateway};
pub use tavily::TavilySearch;
