use anyhow::Context;
use clap::Parser;
use spot_bot_core::config::ConfigLoader;
use spot_bot_engine::{DecisionMaker, OpenAiDecisionMaker};
use spot_bot_kraken::{KrakenCredentials, KrakenRestClient};
use spot_bot_orchestrator::{DefaultStrategy, Orchestrator};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spot-bot")]
#[command(about = "Event-driven, LLM-assisted spot trading bot for Kraken", long_about = None)]
struct Cli {
    /// Trading pair (accepts DOGEUSD, DOGE/USD, doge-usd)
    #[arg(long)]
    pair: Option<String>,

    /// Position size per trade, percent of quote balance (1-100)
    #[arg(long)]
    risk: Option<f64>,

    /// Construct and log orders without submitting them
    #[arg(long, conflicts_with = "live")]
    dry_run: bool,

    /// Submit real orders (overrides the dry-run default)
    #[arg(long)]
    live: bool,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(pair) = cli.pair {
        config.bot.pair = pair;
    }
    if let Some(risk) = cli.risk {
        anyhow::ensure!(
            (1.0..=100.0).contains(&risk),
            "--risk must be between 1 and 100"
        );
        config.risk.default_size_pct = risk;
    }
    if cli.dry_run {
        config.bot.dry_run = true;
    }
    if cli.live {
        config.bot.dry_run = false;
    }

    let credentials =
        KrakenCredentials::from_env().context("Kraken API credentials are required")?;
    let rest = Arc::new(KrakenRestClient::new(&config.kraken, Some(credentials))?);

    match rest.server_time().await {
        Ok(time) => tracing::info!(server_time = %time.rfc1123, "exchange reachable"),
        Err(e) => tracing::warn!(error = %e, "exchange time check failed"),
    }

    let maker: Arc<dyn DecisionMaker> = Arc::new(
        OpenAiDecisionMaker::from_env(config.llm.clone())
            .context("decision maker configuration failed")?,
    );

    let (mut bot, shutdown) =
        Orchestrator::connect(config, rest, maker, Box::new(DefaultStrategy)).await?;
    bot.start().await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            shutdown.shutdown();
        }
    });

    bot.run().await;
    Ok(())
}
