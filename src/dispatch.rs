use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{BearerToken, FlowInvocationRequest, FlowInvoker};
use crate::extract::extract;
use crate::session::Message;
use crate::store::{SessionStore, StoreError};
use crate::tweaks::Tweaks;

pub const FALLBACK_REPLY: &str = "Sorry, an error occurred. Please try again.";

/// Which remote flow a dispatcher talks to.
#[derive(Debug, Clone)]
pub struct FlowTarget {
    pub flow_id: String,
    pub workspace_id: String,
    pub token: BearerToken,
    pub tweaks: Tweaks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    EmptyInput,
    InFlight,
    UnknownSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transport,
    Extraction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing was appended and the busy flag was never raised.
    Ignored(IgnoreReason),
    Replied,
    /// The fallback reply was appended.
    Failed(FailureKind),
}

impl DispatchOutcome {
    fn label(self) -> &'static str {
        match self {
            DispatchOutcome::Ignored(_) => "ignored",
            DispatchOutcome::Replied => "replied",
            DispatchOutcome::Failed(FailureKind::Transport) => "transport_error",
            DispatchOutcome::Failed(FailureKind::Extraction) => "extraction_error",
        }
    }
}

type InFlight = Arc<Mutex<HashSet<Uuid>>>;

/// Busy marker for one session; cleared on drop whatever the send's outcome.
struct BusyGuard {
    in_flight: InFlight,
    session_id: Uuid,
}

impl BusyGuard {
    fn acquire(in_flight: &InFlight, session_id: Uuid) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert(session_id).then(|| Self { in_flight: in_flight.clone(), session_id })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

/// Runs one send cycle per call: user message in, flow invoked, reply (or the
/// fallback) appended.
pub struct MessageDispatcher {
    store: Arc<AsyncMutex<SessionStore>>,
    client: Arc<dyn FlowInvoker>,
    target: FlowTarget,
    in_flight: InFlight,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<AsyncMutex<SessionStore>>,
        client: Arc<dyn FlowInvoker>,
        target: FlowTarget,
    ) -> Self {
        Self { store, client, target, in_flight: Arc::default() }
    }

    pub fn store(&self) -> &Arc<AsyncMutex<SessionStore>> { &self.store }

    pub fn is_busy(&self, session_id: Uuid) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&session_id)
    }

    pub async fn send(
        &self,
        session_id: Uuid,
        raw_input: &str,
    ) -> Result<DispatchOutcome, StoreError> {
        let outcome = self.dispatch(session_id, raw_input).await;
        if let Ok(outcome) = &outcome {
            metrics::counter!("flow_chat_dispatch_total", "outcome" => outcome.label())
                .increment(1);
        }
        outcome
    }

    async fn dispatch(
        &self,
        session_id: Uuid,
        raw_input: &str,
    ) -> Result<DispatchOutcome, StoreError> {
        if raw_input.trim().is_empty() {
            return Ok(DispatchOutcome::Ignored(IgnoreReason::EmptyInput));
        }

        let _busy = {
            let mut store = self.store.lock().await;
            if !store.contains(session_id) {
                return Ok(DispatchOutcome::Ignored(IgnoreReason::UnknownSession));
            }
            let Some(guard) = BusyGuard::acquire(&self.in_flight, session_id) else {
                return Ok(DispatchOutcome::Ignored(IgnoreReason::InFlight));
            };
            store.append_message(session_id, Message::user(raw_input))?;
            guard
        };

        let request = FlowInvocationRequest::chat(
            &self.target.flow_id,
            &self.target.workspace_id,
            raw_input,
            self.target.tweaks.clone(),
        );

        let (reply, outcome) = match self.client.invoke(&request, &self.target.token).await {
            Ok(response) => match extract(&response) {
                Ok(reply) => (reply, DispatchOutcome::Replied),
                Err(e) => {
                    warn!(
                        session = %session_id,
                        reason = %e.reason,
                        body = %response,
                        "flow reply could not be extracted"
                    );
                    (
                        Message::assistant(FALLBACK_REPLY),
                        DispatchOutcome::Failed(FailureKind::Extraction),
                    )
                }
            },
            Err(e) => {
                warn!(
                    session = %session_id,
                    error = %e,
                    status = ?e.status,
                    raw_body = ?e.raw_body,
                    "flow invocation failed"
                );
                (
                    Message::assistant(FALLBACK_REPLY),
                    DispatchOutcome::Failed(FailureKind::Transport),
                )
            }
        };

        self.store.lock().await.append_message(session_id, reply)?;
        info!(session = %session_id, outcome = outcome.label(), "dispatch finished");
        Ok(outcome)
    }
}
