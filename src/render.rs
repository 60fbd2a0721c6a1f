use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::RendererConfig;
use crate::quote::request::QuoteRequest;

/// Draws a quote card. Returns encoded image bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &QuoteRequest) -> Result<Vec<u8>>;
}

/// Runs an external rendering program for every quote.
///
/// The program gets the quote text in `QUOTE_TEXT`, the author name in
/// `QUOTE_AUTHOR` and the avatar image on stdin, and must print the finished
/// image to stdout.
pub struct CommandRenderer {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn run(&self, request: &QuoteRequest) -> Result<Vec<u8>> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .env("QUOTE_TEXT", &request.text)
            .env("QUOTE_AUTHOR", &request.author_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start renderer: {}", self.command))?;

        let mut stdin = child.stdin.take().context("Renderer stdin not captured")?;
        let avatar = request.avatar.clone();
        let writer = tokio::spawn(async move {
            stdin.write_all(&avatar).await?;
            stdin.shutdown().await
        });

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for renderer")?;
        let written = writer.await.context("Renderer stdin task panicked")?;

        if !output.status.success() {
            anyhow::bail!(
                "Renderer exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        written.context("Failed to write avatar to renderer")?;
        if output.stdout.is_empty() {
            anyhow::bail!("Renderer produced no image");
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(&self, request: &QuoteRequest) -> Result<Vec<u8>> {
        let started = std::time::Instant::now();
        let image = tokio::time::timeout(self.timeout, self.run(request))
            .await
            .with_context(|| format!("Renderer timed out after {:?}", self.timeout))??;
        debug!(
            "Rendered quote by {} ({} bytes) in {:?}",
            request.author_name,
            image.len(),
            started.elapsed()
        );
        Ok(image)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn renderer(script: &str, timeout_secs: u64) -> CommandRenderer {
        CommandRenderer::new(&RendererConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout_secs,
        })
    }

    fn request() -> QuoteRequest {
        QuoteRequest {
            text: "Hello".into(),
            author_name: "Anna K".into(),
            avatar: b"AVATAR".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_renderer_receives_request() {
        let r = renderer(r#"printf '%s|%s|' "$QUOTE_TEXT" "$QUOTE_AUTHOR"; cat"#, 10);
        let image = r.render(&request()).await.unwrap();
        assert_eq!(image, b"Hello|Anna K|AVATAR");
    }

    #[tokio::test]
    async fn test_renderer_failure_reports_stderr() {
        let r = renderer("echo 'font missing' >&2; exit 3", 10);
        let err = r.render(&request()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("font missing"));
    }

    #[tokio::test]
    async fn test_empty_output_is_error() {
        let r = renderer("cat > /dev/null", 10);
        assert!(r.render(&request()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_program() {
        let r = CommandRenderer::new(&RendererConfig {
            command: "/nonexistent/quote-render".into(),
            args: Vec::new(),
            timeout_secs: 5,
        });
        assert!(r.render(&request()).await.is_err());
    }
}
