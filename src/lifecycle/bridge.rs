use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::activity::InputKind;
use crate::log_info;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Signals from the page hosting the content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum PageEvent {
    Input(InputKind),
    Visibility(Visibility),
    Unload,
}

/// Receives page events in the order the host emitted them.
#[async_trait]
pub trait LifecycleHandler: Send + Sync + 'static {
    async fn on_input(&self, kind: InputKind);

    async fn on_visibility_change(&self, visibility: Visibility);

    /// Must not wait for network completion.
    async fn on_unload(&self);
}

pub type PageEventSender = mpsc::UnboundedSender<PageEvent>;

/// Event pump between the host and the tracker. Attached once; runs until
/// unload or `stop`.
pub struct LifecycleBridge {
    sender: PageEventSender,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<PageEvent>>>,
    attached: AtomicBool,
    cancel_token: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleBridge {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            attached: AtomicBool::new(false),
            cancel_token: CancellationToken::new(),
            pump: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> PageEventSender {
        self.sender.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub async fn attach<H: LifecycleHandler>(&self, handler: Arc<H>) -> Result<()> {
        if self.attached.swap(true, Ordering::SeqCst) {
            bail!("lifecycle listeners already registered");
        }
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .context("lifecycle event receiver already consumed")?;

        let handle = tokio::spawn(pump(handler, receiver, self.cancel_token.clone()));
        *self.pump.lock().await = Some(handle);
        Ok(())
    }

    /// Stops the pump without waiting for it. Safe to call from a handler.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub async fn stop(&self) -> Result<()> {
        self.cancel();
        match self.pump.lock().await.take() {
            Some(handle) => handle.await.context("lifecycle pump failed to join"),
            None => Ok(()),
        }
    }
}

impl Default for LifecycleBridge {
    fn default() -> Self {
        Self::new()
    }
}

async fn pump<H: LifecycleHandler>(
    handler: Arc<H>,
    mut events: mpsc::UnboundedReceiver<PageEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Some(PageEvent::Input(kind)) => handler.on_input(kind).await,
                Some(PageEvent::Visibility(visibility)) => {
                    handler.on_visibility_change(visibility).await
                }
                Some(PageEvent::Unload) => {
                    handler.on_unload().await;
                    break;
                }
                None => break,
            },
        }
    }
    log_info!("lifecycle listeners detached");
}
