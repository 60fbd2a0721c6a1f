use crate::error::QuoteError;
use crate::quote::author::{Author, AuthorSource};
use crate::quote::chain::ResolvedQuoteSource;

/// Everything the renderer needs to draw a quote card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub text: String,
    pub author_name: String,
    pub avatar: Vec<u8>,
}

/// Check that a resolved source is worth attributing.
///
/// Returns `Ok(None)` when the event had no forward or reply at all, so
/// another handler should take it. Texts of `max_chars` characters or more
/// are rejected outright.
pub fn admit<'s>(
    source: &'s ResolvedQuoteSource<'_>,
    max_chars: usize,
) -> Result<Option<&'s str>, QuoteError> {
    let text = match source.text.as_deref() {
        None if source.depth == 0 => return Ok(None),
        None | Some("") => return Err(QuoteError::EmptyQuoteChain),
        Some(text) => text,
    };

    let chars = text.chars().count();
    if chars >= max_chars {
        return Err(QuoteError::QuoteTooLarge {
            chars,
            limit: max_chars,
        });
    }

    Ok(Some(text))
}

/// Assemble the render request. An override author replaces the one derived
/// from the root message; `fallback` is only asked when there is no override.
pub async fn build(
    source: &ResolvedQuoteSource<'_>,
    override_author: Option<Author>,
    fallback: &dyn AuthorSource,
    max_chars: usize,
) -> Result<Option<QuoteRequest>, QuoteError> {
    let Some(text) = admit(source, max_chars)? else {
        return Ok(None);
    };

    let author = match override_author {
        Some(author) => author,
        None => fallback.resolve_author(source.root).await?,
    };

    Ok(Some(QuoteRequest {
        text: text.to_string(),
        author_name: author.display_name,
        avatar: author.avatar,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthorError;
    use crate::platform::{ChatMessage, ContextKind, Sender};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedAuthor {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FixedAuthor {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl AuthorSource for FixedAuthor {
        async fn resolve_author(&self, _root: &ChatMessage) -> Result<Author, AuthorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthorError::Lookup(anyhow::anyhow!("group is banned")));
            }
            Ok(Author {
                display_name: "Root Author".into(),
                avatar: vec![1, 2, 3],
            })
        }
    }

    fn root() -> ChatMessage {
        ChatMessage {
            text: Some("x".into()),
            forwards: Vec::new(),
            reply: None,
            sender: Sender::User { id: 1 },
            context: ContextKind::Message,
        }
    }

    fn source(root: &ChatMessage, text: Option<String>, depth: usize) -> ResolvedQuoteSource<'_> {
        ResolvedQuoteSource { text, root, depth }
    }

    #[tokio::test]
    async fn test_not_applicable() {
        let root = root();
        let fallback = FixedAuthor::new(false);
        let result = build(&source(&root, None, 0), None, &fallback, 10_000)
            .await
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let root = root();
        let fallback = FixedAuthor::new(false);
        let err = build(&source(&root, None, 2), None, &fallback, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::EmptyQuoteChain));
    }

    #[test]
    fn test_size_boundary() {
        let root = root();
        let ok = source(&root, Some("a".repeat(9_999)), 0);
        assert!(admit(&ok, 10_000).unwrap().is_some());

        let too_big = source(&root, Some("a".repeat(10_000)), 0);
        let err = admit(&too_big, 10_000).unwrap_err();
        assert!(matches!(
            err,
            QuoteError::QuoteTooLarge {
                chars: 10_000,
                limit: 10_000
            }
        ));
    }

    #[test]
    fn test_size_counts_characters_not_bytes() {
        let root = root();
        let cyrillic = source(&root, Some("я".repeat(9_999)), 0);
        assert!(admit(&cyrillic, 10_000).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fallback_author() {
        let root = root();
        let fallback = FixedAuthor::new(false);
        let request = build(&source(&root, Some("Hello".into()), 0), None, &fallback, 10_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            request,
            QuoteRequest {
                text: "Hello".into(),
                author_name: "Root Author".into(),
                avatar: vec![1, 2, 3],
            }
        );
    }

    #[tokio::test]
    async fn test_override_replaces_fallback() {
        let root = root();
        let fallback = FixedAuthor::new(false);
        let over = Author {
            display_name: "Ivan Petrov".into(),
            avatar: vec![9],
        };
        let request = build(&source(&root, Some("Hi".into()), 0), Some(over), &fallback, 10_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.author_name, "Ivan Petrov");
        assert_eq!(request.avatar, vec![9]);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_author_unsupported() {
        let root = root();
        let fallback = FixedAuthor::new(true);
        let err = build(&source(&root, Some("Hi".into()), 0), None, &fallback, 10_000)
            .await
            .unwrap_err();
        assert!(matches!(err, QuoteError::AuthorUnsupported(_)));
    }
}
