use anyhow::{Context, anyhow};

use cerberus::channels::{DiscordClient, RedditClient};
use cerberus::chat::ChatWorker;
use cerberus::config::RelayConfig;
use cerberus::error::{self, Error};
use cerberus::forum::ForumWorker;
use cerberus::relay::DuplexEnd;
use cerberus::supervisor::Supervisor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = RelayConfig::from_env().context("Failed to load configuration")?;

    eprintln!("🐕 Cerberus v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Subreddit: r/{}", config.reddit.subreddit);
    eprintln!("   Keyword: {:?}", config.keyword);
    eprintln!("   Command prefix: {}", config.discord.prefix);
    eprintln!(
        "   Default channel: {}",
        config
            .discord
            .default_channel_id
            .as_deref()
            .unwrap_or("none (use set-destination)")
    );
    eprintln!("   Relay interval: {}s\n", config.relay_interval.as_secs());

    // ── Forum side (blocking, own thread) ────────────────────────────────
    let reddit = config.reddit.clone();
    let filter = config.relay_filter()?;
    let pause = config.forum_pause;
    let forum = move |end: DuplexEnd| -> error::Result<()> {
        // The blocking HTTP client must be built off the async runtime.
        let client = RedditClient::new(reddit)?;
        client.authenticate()?;
        tracing::info!(subreddit = %client.subreddit(), "Logged in to Reddit");
        ForumWorker::new(client, end, filter, pause).run()?;
        Ok(())
    };

    // ── Chat side (async, this runtime) ──────────────────────────────────
    let token = config.discord.token.clone();
    let chat_config = config.chat_worker_config();
    let chat = move |end: DuplexEnd| async move {
        let client = DiscordClient::connect(token).await?;
        ChatWorker::new(client, end, chat_config).run().await?;
        Ok::<(), Error>(())
    };

    let report = Supervisor::run(forum, chat).await;
    if report.is_clean() {
        return Ok(());
    }

    for (side, outcome) in [("forum", &report.forum), ("chat", &report.chat)] {
        if let Err(e) = outcome {
            eprintln!("Error: {side} worker stopped: {e}");
        }
    }
    Err(anyhow!("relay stopped"))
}
