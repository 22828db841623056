use anyhow::{Context, Result};
use deep_research::config::{AppConfig, SearchProvider};
use deep_research::server::{app, AppState};
use deep_research::tools::{
    ContentFetcher, DuckDuckGoSearch, HttpPageLoader, RigBackend, SearchGateway, TavilySearch,
};
use deep_research::{DeepResearcher, LlmResearchModel, TextBudgeter};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("deep_research=debug,tower_http=info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let researcher = build_researcher(&config)?;
    let state = AppState {
        researcher: Arc::new(researcher),
        defaults: config.research.clone(),
    };

    let router = app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;
    info!(
        provider = config.llm.provider.as_str(),
        model = config.llm.model_name(),
        "Deep research server running on http://{}",
        config.server.bind_addr
    );

    axum::serve(listener, router).await?;
    Ok(())
}

fn build_researcher(config: &AppConfig) -> Result<DeepResearcher> {
    let backend = RigBackend::new(
        config.llm.provider,
        config.llm.api_key.as_deref().unwrap_or_default(),
        config.llm.model_name(),
    )
    .with_timeout(config.llm.timeout())
    .with_retries(config.llm.max_retries, config.llm.retry_delay());
    let model = LlmResearchModel::new(Arc::new(backend));

    let search: Arc<dyn SearchGateway> = match config.search.provider {
        SearchProvider::DuckDuckGo => Arc::new(DuckDuckGoSearch::new(
            config.search.region.clone(),
            config.search.safe_search,
            config.search.timeout(),
        )?),
        SearchProvider::Tavily => Arc::new(TavilySearch::new(
            config.search.api_key.clone().unwrap_or_default(),
            config.search.timeout(),
        )?),
    };

    let fetcher = ContentFetcher::new(
        Arc::new(HttpPageLoader::new()?),
        config.research.fetch_timeout(),
    );
    let budgeter = TextBudgeter::new()?;

    Ok(DeepResearcher::new(
        Arc::new(model),
        search,
        fetcher,
        budgeter,
        config.research_options(),
    ))
}
