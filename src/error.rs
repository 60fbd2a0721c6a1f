use thiserror::Error;

use crate::config::Messages;

/// Why an author could not be attributed.
#[derive(Debug, Error)]
pub enum AuthorError {
    #[error("context type not supported: {0}")]
    UnsupportedContextKind(String),

    #[error("profile lookup failed")]
    Lookup(#[source] anyhow::Error),

    #[error("avatar download failed")]
    AvatarFetch(#[source] anyhow::Error),
}

/// Everything that can stop a quote from being delivered.
///
/// "Not a quote command" is not an error; the pipeline reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("forward/reply chain contains no text")]
    EmptyQuoteChain,

    #[error("quote text is {chars} characters, limit is {limit}")]
    QuoteTooLarge { chars: usize, limit: usize },

    #[error("context type not supported: {0}")]
    UnsupportedContextKind(String),

    #[error("author could not be resolved")]
    AuthorUnsupported(#[source] AuthorError),

    #[error("forward chain deeper than {limit} levels")]
    ChainTooDeep { limit: usize },

    #[error("avatar download failed")]
    AvatarFetchFailed(#[source] anyhow::Error),

    #[error("rendering failed")]
    RenderFailure(#[source] anyhow::Error),

    #[error("photo upload failed")]
    UploadFailure(#[source] anyhow::Error),
}

impl From<AuthorError> for QuoteError {
    fn from(err: AuthorError) -> Self {
        match err {
            AuthorError::UnsupportedContextKind(kind) => QuoteError::UnsupportedContextKind(kind),
            AuthorError::AvatarFetch(e) => QuoteError::AvatarFetchFailed(e),
            other => QuoteError::AuthorUnsupported(other),
        }
    }
}

impl QuoteError {
    /// Reply shown to the user for this failure.
    pub fn user_message<'a>(&self, messages: &'a Messages) -> &'a str {
        match self {
            QuoteError::EmptyQuoteChain => &messages.empty_quote,
            QuoteError::QuoteTooLarge { .. } => &messages.quote_too_large,
            QuoteError::UnsupportedContextKind(_) | QuoteError::AuthorUnsupported(_) => {
                &messages.author_unsupported
            }
            QuoteError::ChainTooDeep { .. } => &messages.chain_too_deep,
            QuoteError::AvatarFetchFailed(_) => &messages.avatar_failed,
            QuoteError::RenderFailure(_) | QuoteError::UploadFailure(_) => &messages.try_again,
        }
    }

    /// Failures an operator should look at, as opposed to bad user input.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            QuoteError::RenderFailure(_)
                | QuoteError::UploadFailure(_)
                | QuoteError::AvatarFetchFailed(_)
        )
    }
}
