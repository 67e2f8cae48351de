use tracing_subscriber::EnvFilter;

use youtube_fetcher::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("youtube_fetcher=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env();
    youtube_fetcher::run(config).await
}
