use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::QuoteError;
use crate::platform::vk::VkClient;
use crate::platform::{IncomingMessage, Outbox};
use crate::quote::mention;
use crate::quote::request::QuoteRequest;
use crate::quote::QuotePipeline;
use crate::render::Renderer;

/// Peer workers with no traffic for this long are shut down.
const WORKER_IDLE: Duration = Duration::from_secs(600);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Messages a single peer may have waiting before new ones are dropped.
const PEER_QUEUE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Handled,
    Next,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Related,
    Help,
    Quote,
    DmFallback,
    ChatFallback,
}

/// Handlers in the order they get a chance at each message.
const CHAIN: [Stage; 5] = [
    Stage::Related,
    Stage::Help,
    Stage::Quote,
    Stage::DmFallback,
    Stage::ChatFallback,
];

/// Everything needed to answer one inbound message.
pub struct Bot {
    config: Config,
    pipeline: QuotePipeline,
    renderer: Arc<dyn Renderer>,
    outbox: Arc<dyn Outbox>,
}

impl Bot {
    pub fn new(
        config: Config,
        pipeline: QuotePipeline,
        renderer: Arc<dyn Renderer>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            config,
            pipeline,
            renderer,
            outbox,
        }
    }

    pub async fn handle(&self, incoming: &IncomingMessage) -> Result<()> {
        for stage in CHAIN {
            let flow = match stage {
                Stage::Related => self.check_related(incoming),
                Stage::Help => self.help(incoming).await?,
                Stage::Quote => self.quote(incoming).await?,
                Stage::DmFallback => self.fallback(incoming, true).await?,
                Stage::ChatFallback => self.fallback(incoming, false).await?,
            };
            if flow == Flow::Handled {
                debug!("Peer {} handled at {:?}", incoming.peer_id, stage);
                break;
            }
        }
        Ok(())
    }

    /// Only DMs and chat messages that tag the bot go further.
    fn check_related(&self, incoming: &IncomingMessage) -> Flow {
        if !self.config.is_peer_allowed(incoming.peer_id) {
            debug!("Peer {} is not allowed, ignoring", incoming.peer_id);
            return Flow::Handled;
        }
        if incoming.is_dm || mention::mentions_owner(incoming.text(), self.config.vk.group_id) {
            Flow::Next
        } else {
            Flow::Handled
        }
    }

    async fn help(&self, incoming: &IncomingMessage) -> Result<Flow> {
        let text = incoming.text().to_lowercase();
        if !(text.contains("!help") || text.contains("!хелп")) {
            return Ok(Flow::Next);
        }

        let messages = &self.config.messages;
        let reply = if incoming.is_dm {
            &messages.help_dm
        } else {
            &messages.help_chat
        };
        self.outbox.send_text(incoming.peer_id, reply).await?;
        Ok(Flow::Handled)
    }

    async fn quote(&self, incoming: &IncomingMessage) -> Result<Flow> {
        let outcome = match self.pipeline.prepare(&incoming.message).await {
            Ok(None) => return Ok(Flow::Next),
            Ok(Some(request)) => self.deliver(incoming.peer_id, request).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.report(incoming.peer_id, e).await?;
        }
        Ok(Flow::Handled)
    }

    async fn deliver(&self, peer_id: i64, request: QuoteRequest) -> Result<(), QuoteError> {
        info!(
            "Rendering quote for peer {}: {} chars by {}",
            peer_id,
            request.text.chars().count(),
            request.author_name
        );
        let image = self
            .renderer
            .render(&request)
            .await
            .map_err(QuoteError::RenderFailure)?;
        self.outbox
            .send_photo(peer_id, image)
            .await
            .map_err(QuoteError::UploadFailure)
    }

    async fn report(&self, peer_id: i64, err: QuoteError) -> Result<()> {
        let reply = err.user_message(&self.config.messages);
        if err.is_operational() {
            error!("Quote for peer {} failed: {:#}", peer_id, anyhow::Error::from(err));
        } else {
            info!("Quote for peer {} rejected: {}", peer_id, err);
        }
        self.outbox.send_text(peer_id, reply).await
    }

    async fn fallback(&self, incoming: &IncomingMessage, dm: bool) -> Result<Flow> {
        if incoming.is_dm != dm {
            return Ok(Flow::Next);
        }
        let messages = &self.config.messages;
        let reply = if dm {
            &messages.fallback_dm
        } else {
            &messages.fallback_chat
        };
        self.outbox.send_text(incoming.peer_id, reply).await?;
        Ok(Flow::Handled)
    }
}

struct PeerWorker {
    tx: mpsc::Sender<IncomingMessage>,
    last_seen: Instant,
}

impl PeerWorker {
    fn spawn(bot: Arc<Bot>, peer_id: i64) -> Self {
        Self {
            tx: spawn_worker(bot, peer_id),
            last_seen: Instant::now(),
        }
    }

    /// Queue a message for this peer. A full queue drops the message, a
    /// stopped worker is replaced.
    fn dispatch(&mut self, bot: &Arc<Bot>, incoming: IncomingMessage) {
        let peer_id = incoming.peer_id;
        self.last_seen = Instant::now();

        match self.tx.try_send(incoming) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Queue for peer {} is full ({} pending), dropping message",
                    peer_id, PEER_QUEUE
                );
            }
            Err(mpsc::error::TrySendError::Closed(incoming)) => {
                warn!("Worker for peer {} is gone, restarting", peer_id);
                self.tx = spawn_worker(bot.clone(), peer_id);
                self.tx.try_send(incoming).ok();
            }
        }
    }
}

/// One task per peer keeps replies in arrival order within a conversation.
fn spawn_worker(bot: Arc<Bot>, peer_id: i64) -> mpsc::Sender<IncomingMessage> {
    let (tx, mut rx) = mpsc::channel::<IncomingMessage>(PEER_QUEUE);
    tokio::spawn(async move {
        while let Some(incoming) = rx.recv().await {
            if let Err(e) = bot.handle(&incoming).await {
                error!("Error handling message from peer {}: {:#}", peer_id, e);
            }
        }
        debug!("Worker for peer {} stopped", peer_id);
    });
    tx
}

/// Poll VK for new messages and hand each one to its peer's worker.
pub async fn run(bot: Arc<Bot>, vk: Arc<VkClient>) -> Result<()> {
    info!("Connecting to VK long poll...");
    let mut poll = vk.long_poll().await?;
    let mut workers: HashMap<i64, PeerWorker> = HashMap::new();

    info!("Bot is running");
    loop {
        let batch = match poll.next_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("Long poll failed: {:#}", e);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
                continue;
            }
        };

        for incoming in batch {
            let peer_id = incoming.peer_id;
            workers
                .entry(peer_id)
                .or_insert_with(|| PeerWorker::spawn(bot.clone(), peer_id))
                .dispatch(&bot, incoming);
        }

        workers.retain(|_, w| w.last_seen.elapsed() < WORKER_IDLE);
    }
}
