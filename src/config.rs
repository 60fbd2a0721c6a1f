use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vk: VkConfig,
    pub renderer: RendererConfig,
    #[serde(default)]
    pub quote: QuoteConfig,
    #[serde(default)]
    pub messages: Messages,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VkConfig {
    pub token: String,
    /// The bot's own community id. Mentions of it never become the quoted author.
    pub group_id: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Peers the bot answers. Empty allows everyone.
    #[serde(default)]
    pub allowed_peer_ids: Vec<i64>,
    /// Upper bound for API calls, uploads and avatar downloads
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuoteConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
    #[serde(default = "default_anonymous_avatar_url")]
    pub anonymous_avatar_url: String,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_chain_depth: default_max_chain_depth(),
            anonymous_avatar_url: default_anonymous_avatar_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RendererConfig {
    /// Program that reads the avatar on stdin and writes the image to stdout
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

/// User-facing texts. Override them in `[messages]` to localize the bot.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Messages {
    pub anonymous_name: String,
    pub help_dm: String,
    pub help_chat: String,
    pub empty_quote: String,
    pub quote_too_large: String,
    pub author_unsupported: String,
    pub chain_too_deep: String,
    pub avatar_failed: String,
    pub try_again: String,
    pub fallback_dm: String,
    pub fallback_chat: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            anonymous_name: "Anonymous".to_string(),
            help_dm: "Hi! Forward me a few messages and I'll turn them into a quote. \
                      Emoji and any script are fine 😉"
                .to_string(),
            help_chat: "Forward a few messages and tag me, I'll turn them into a quote. \
                        Emoji and any script are fine 😉"
                .to_string(),
            empty_quote: "Looks like those messages are empty or missing. \
                          I need some text to make a quote 🧐"
                .to_string(),
            quote_too_large: "That's a huge quote... I'm scared to draw it 😰".to_string(),
            author_unsupported: "I don't support this kind of author yet".to_string(),
            chain_too_deep: "That forward chain goes too deep for me to follow".to_string(),
            avatar_failed: "I couldn't download the author's avatar, try again later".to_string(),
            try_again: "Something went wrong, please try again.".to_string(),
            fallback_dm: "Sorry, I didn't get that 😔\nSend \"!help\" and I'll tell you what I can do"
                .to_string(),
            fallback_chat:
                "Sorry, I didn't get that 😔\nSend \"@newquote !help\" and I'll tell you what I can do"
                    .to_string(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.vk.com/method".to_string()
}

fn default_api_version() -> String {
    "5.199".to_string()
}

fn default_language() -> String {
    "ru".to_string()
}

fn default_http_timeout() -> u64 {
    15
}

fn default_max_chars() -> usize {
    10_000
}

fn default_max_chain_depth() -> usize {
    50
}

fn default_anonymous_avatar_url() -> String {
    "https://vk.com/images/camera_200.png".to_string()
}

fn default_render_timeout() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;

        if config.vk.token.trim().is_empty() {
            anyhow::bail!("vk.token must not be empty");
        }
        if config.vk.http_timeout_secs == 0 {
            anyhow::bail!("vk.http_timeout_secs must be positive");
        }
        if config.renderer.command.trim().is_empty() {
            anyhow::bail!("renderer.command must not be empty");
        }

        Ok(config)
    }

    /// Single allow-list check: an empty list lets every peer through.
    pub fn is_peer_allowed(&self, peer_id: i64) -> bool {
        self.vk.allowed_peer_ids.is_empty() || self.vk.allowed_peer_ids.contains(&peer_id)
    }
}
