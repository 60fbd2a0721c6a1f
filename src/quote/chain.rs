use crate::error::QuoteError;
use crate::platform::ChatMessage;
use crate::quote::normalize::normalize;

/// Quotable text found by walking a message's forwards and replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuoteSource<'a> {
    /// `None` when nothing in the chain carries text
    pub text: Option<String>,
    /// Message whose sender gets attributed
    pub root: &'a ChatMessage,
    /// How many levels were descended before text (or the end) was found
    pub depth: usize,
}

/// Walk forwards and replies starting at `msg` until a message with text is found.
///
/// Forwards win over a reply. When the first forwarded message has text, every
/// forwarded message with text is normalized and joined with newlines. A reply
/// target's text is taken as is, without normalization.
///
/// Each step into a forward or a reply counts as one level of depth, and
/// descending past `max_depth` levels fails with `ChainTooDeep`.
pub fn resolve(msg: &ChatMessage, max_depth: usize) -> Result<ResolvedQuoteSource<'_>, QuoteError> {
    let mut current = msg;
    let mut depth = 0;

    loop {
        let next = if let Some(root) = current.forwards.first() {
            if root.has_text() {
                return Ok(ResolvedQuoteSource {
                    text: Some(compile_text(&current.forwards)),
                    root,
                    depth,
                });
            }
            root
        } else if let Some(root) = current.reply.as_deref() {
            if root.has_text() {
                return Ok(ResolvedQuoteSource {
                    text: root.text.clone(),
                    root,
                    depth,
                });
            }
            root
        } else {
            return Ok(ResolvedQuoteSource {
                text: None,
                root: current,
                depth,
            });
        };

        depth += 1;
        if depth > max_depth {
            return Err(QuoteError::ChainTooDeep { limit: max_depth });
        }
        current = next;
    }
}

fn compile_text(forwards: &[ChatMessage]) -> String {
    forwards
        .iter()
        .filter(|m| m.has_text())
        .filter_map(|m| m.text.as_deref())
        .map(normalize)
        .collect::<Vec<_>>()
        .join("\n")
}
