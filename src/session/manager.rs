use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};

use crate::debug_log;
use crate::host::PageHost;
use crate::models::Session;
use crate::sync::SyncClient;

#[derive(Debug, Clone)]
enum Bootstrap {
    Pending,
    Resolved(Option<Session>),
}

enum SessionSlot {
    Vacant,
    Opening(watch::Receiver<Bootstrap>),
    Open(Session),
}

/// Owns the browsing session record.
///
/// Concurrent `start_session` calls share one in-flight create request. A
/// failed create leaves the slot vacant; nothing retries on its own.
#[derive(Clone)]
pub struct SessionManager {
    slot: Arc<Mutex<SessionSlot>>,
    sync: SyncClient,
    host: Arc<dyn PageHost>,
    configured_id: Option<String>,
    debug: bool,
}

impl SessionManager {
    pub fn new(
        sync: SyncClient,
        host: Arc<dyn PageHost>,
        configured_id: Option<String>,
        debug: bool,
    ) -> Self {
        Self {
            slot: Arc::new(Mutex::new(SessionSlot::Vacant)),
            sync,
            host,
            configured_id,
            debug,
        }
    }

    /// Returns the open session, opening one if needed.
    pub async fn start_session(&self) -> Option<Session> {
        let pending = {
            let mut slot = self.slot.lock().await;
            let in_flight = match &*slot {
                SessionSlot::Open(session) => return Some(session.clone()),
                SessionSlot::Opening(pending) => Some(pending.clone()),
                SessionSlot::Vacant => None,
            };
            match in_flight {
                Some(pending) => pending,
                None => self.spawn_bootstrap(&mut slot),
            }
        };
        wait_resolved(pending).await
    }

    /// Starts a bootstrap if no session is open or opening, without waiting.
    pub async fn begin(&self) {
        let mut slot = self.slot.lock().await;
        if matches!(*slot, SessionSlot::Vacant) {
            self.spawn_bootstrap(&mut slot);
        }
    }

    /// The open session, waiting out an in-flight bootstrap but never
    /// starting one.
    pub async fn current(&self) -> Option<Session> {
        let pending = {
            let slot = self.slot.lock().await;
            match &*slot {
                SessionSlot::Open(session) => return Some(session.clone()),
                SessionSlot::Opening(pending) => pending.clone(),
                SessionSlot::Vacant => return None,
            }
        };
        wait_resolved(pending).await
    }

    /// Id to attach to dependent calls: the open session's, else the one
    /// supplied in configuration.
    pub async fn current_id(&self) -> Option<String> {
        match self.current().await {
            Some(session) => Some(session.session_id),
            None => self.configured_id.clone(),
        }
    }

    /// The open session, if any, without waiting.
    pub async fn session(&self) -> Option<Session> {
        match &*self.slot.lock().await {
            SessionSlot::Open(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// Closes the session and reports it to the backend. Impressions must be
    /// flushed by the caller first.
    pub async fn end_session(&self) -> Option<Session> {
        let session = self.current().await?;
        {
            let mut slot = self.slot.lock().await;
            let still_open = matches!(
                &*slot,
                SessionSlot::Open(open) if open.session_id == session.session_id
            );
            if !still_open {
                return None;
            }
            *slot = SessionSlot::Vacant;
        }

        self.sync.end_session(&session.session_id).await;
        debug_log!(self.debug, "Session ended: {}", session.session_id);
        Some(session)
    }

    fn spawn_bootstrap(&self, slot: &mut SessionSlot) -> watch::Receiver<Bootstrap> {
        let (resolved, pending) = watch::channel(Bootstrap::Pending);
        *slot = SessionSlot::Opening(pending.clone());

        let this = self.clone();
        tokio::spawn(async move { this.bootstrap(resolved).await });
        pending
    }

    async fn bootstrap(self, resolved: watch::Sender<Bootstrap>) {
        let device = self.host.device_context();
        let session = self
            .sync
            .create_session(&device)
            .await
            .map(|created| {
                Session::opened(
                    created.session_id,
                    created.device_fingerprint,
                    &device,
                    Utc::now(),
                )
            });

        {
            let mut slot = self.slot.lock().await;
            *slot = match &session {
                Some(session) => SessionSlot::Open(session.clone()),
                None => SessionSlot::Vacant,
            };
        }

        if let Some(session) = &session {
            debug_log!(self.debug, "Session started: {}", session.session_id);
        }
        let _ = resolved.send(Bootstrap::Resolved(session));
    }
}

async fn wait_resolved(mut pending: watch::Receiver<Bootstrap>) -> Option<Session> {
    match pending
        .wait_for(|state| matches!(state, Bootstrap::Resolved(_)))
        .await
    {
        Ok(state) => match &*state {
            Bootstrap::Resolved(session) => session.clone(),
            Bootstrap::Pending => None,
        },
        Err(_) => None,
    }
}
