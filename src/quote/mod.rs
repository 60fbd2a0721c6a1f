pub mod author;
pub mod chain;
pub mod mention;
pub mod normalize;
pub mod request;

use crate::config::QuoteConfig;
use crate::error::QuoteError;
use crate::platform::ChatMessage;
use crate::quote::author::AuthorResolver;
use crate::quote::request::QuoteRequest;

/// Turns an inbound message into a render request: find the quoted text,
/// decide who said it, enforce the limits.
pub struct QuotePipeline {
    authors: AuthorResolver,
    max_chars: usize,
    max_chain_depth: usize,
}

impl QuotePipeline {
    pub fn new(authors: AuthorResolver, config: &QuoteConfig) -> Self {
        Self {
            authors,
            max_chars: config.max_chars,
            max_chain_depth: config.max_chain_depth,
        }
    }

    /// `Ok(None)` means the message forwards or replies to nothing and is not
    /// a quote command.
    pub async fn prepare(&self, message: &ChatMessage) -> Result<Option<QuoteRequest>, QuoteError> {
        let source = chain::resolve(message, self.max_chain_depth)?;

        // Limits first, so rejected quotes cost no lookups.
        if request::admit(&source, self.max_chars)?.is_none() {
            return Ok(None);
        }

        let command_text = message.text.as_deref().unwrap_or_default();
        let override_author = self.authors.override_author(command_text).await?;

        request::build(&source, override_author, &self.authors, self.max_chars).await
    }
}
