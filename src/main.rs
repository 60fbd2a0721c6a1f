mod bot;
mod config;
mod error;
mod platform;
mod quote;
mod render;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bot::Bot;
use crate::config::Config;
use crate::platform::vk::{HttpAvatarFetcher, VkClient};
use crate::quote::author::AuthorResolver;
use crate::quote::QuotePipeline;
use crate::render::CommandRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,newquote=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Community: club{}", config.vk.group_id);
    info!("  API version: {}", config.vk.api_version);
    info!("  Renderer: {}", config.renderer.command);
    info!("  Allowed peers: {:?}", config.vk.allowed_peer_ids);

    let http_timeout = Duration::from_secs(config.vk.http_timeout_secs);
    let vk = Arc::new(VkClient::new(config.vk.clone())?);
    let authors = AuthorResolver::new(
        vk.clone(),
        Arc::new(HttpAvatarFetcher::new(http_timeout)?),
        config.vk.group_id,
        config.messages.anonymous_name.clone(),
        config.quote.anonymous_avatar_url.clone(),
    );
    let pipeline = QuotePipeline::new(authors, &config.quote);
    let renderer = Arc::new(CommandRenderer::new(&config.renderer));

    let bot = Arc::new(Bot::new(config, pipeline, renderer, vk.clone()));

    info!("Bot is starting...");
    bot::run(bot, vk).await?;

    Ok(())
}
