//! Message routing for Murmur.
//!
//! The router turns inbound events into delivery plans, updating presence
//! and session bindings on the way. Each connection moves through
//! `Unjoined -> Joined -> Closed`; see [`SessionState`].

use crate::gateway::{DeliveryGateway, DeliveryPlan, Topic};
use crate::message::{
    validate_identity, Identity, Message, ValidationError, DEFAULT_MAX_IDENTITY_LENGTH,
};
use crate::presence::PresenceRegistry;
use crate::session::{AlreadyBoundError, Session, SessionBinding, SessionState};
use murmur_protocol::{error_codes, ClientFrame};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Default maximum message body length in bytes.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 4096;

/// Event arrived in a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// `register` on a connection that already joined.
    #[error("Already joined as {0}")]
    AlreadyJoined(Identity),

    /// Any other event before `register`.
    #[error("Must register before sending {0}")]
    NotJoined(&'static str),
}

/// Router errors.
///
/// A failed event leaves presence and bindings untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    /// Event sequence violates the connection lifecycle.
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Event is malformed.
    #[error("Invalid event: {0}")]
    Validation(#[from] ValidationError),

    /// Binding table disagrees with the connection's state.
    #[error(transparent)]
    AlreadyBound(#[from] AlreadyBoundError),
}

impl RouterError {
    /// Get the code reported to the client.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            RouterError::Protocol(_) => error_codes::PROTOCOL,
            RouterError::Validation(_) => error_codes::VALIDATION,
            RouterError::AlreadyBound(_) => error_codes::ALREADY_BOUND,
        }
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Protocol(_) => "protocol",
            RouterError::Validation(_) => "validation",
            RouterError::AlreadyBound(_) => "already_bound",
        }
    }
}

/// An inbound chat event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Join the chat as `sender`.
    Register { sender: Identity },
    /// Broadcast `content`.
    Chat { sender: Identity, content: String },
    /// Send `content` to `receiver` only.
    Private {
        sender: Identity,
        content: String,
        receiver: Option<Identity>,
    },
    /// Leave the chat.
    Leave { sender: Identity },
}

impl InboundEvent {
    /// Convert a client frame. Returns `None` for frames that are not chat
    /// events (keepalives).
    #[must_use]
    pub fn from_frame(frame: ClientFrame) -> Option<Self> {
        match frame {
            ClientFrame::Register { sender } => Some(InboundEvent::Register {
                sender: sender.into(),
            }),
            ClientFrame::Chat { sender, content } => Some(InboundEvent::Chat {
                sender: sender.into(),
                content,
            }),
            ClientFrame::Private {
                sender,
                content,
                receiver,
            } => Some(InboundEvent::Private {
                sender: sender.into(),
                content,
                receiver: receiver.map(Identity::from),
            }),
            ClientFrame::Leave { sender } => Some(InboundEvent::Leave {
                sender: sender.into(),
            }),
            ClientFrame::Ping { .. } => None,
        }
    }

    /// Event name for logs and metrics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Register { .. } => "register",
            InboundEvent::Chat { .. } => "chat",
            InboundEvent::Private { .. } => "private",
            InboundEvent::Leave { .. } => "leave",
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Use the `sender` claimed by chat/private/leave events as given.
    /// When `false`, the identity bound at register time is used instead.
    pub trust_client_sender: bool,
    /// Maximum identity length in bytes.
    pub max_identity_length: usize,
    /// Maximum chat/private body length in bytes.
    pub max_content_length: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            trust_client_sender: true,
            max_identity_length: DEFAULT_MAX_IDENTITY_LENGTH,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
        }
    }
}

/// The central message router.
///
/// Shared by every connection worker. All operations are synchronous and
/// in-memory; the only shared state is the presence registry and the
/// binding table.
pub struct MessageRouter {
    presence: Arc<PresenceRegistry>,
    bindings: Arc<SessionBinding>,
    gateway: Arc<dyn DeliveryGateway>,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a router over the given registry, bindings and gateway.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        bindings: Arc<SessionBinding>,
        gateway: Arc<dyn DeliveryGateway>,
        config: RouterConfig,
    ) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            presence,
            bindings,
            gateway,
            config,
        }
    }

    /// Get the presence registry.
    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Get the binding table.
    #[must_use]
    pub fn bindings(&self) -> &Arc<SessionBinding> {
        &self.bindings
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            online: self.presence.len(),
            bound_connections: self.bindings.len(),
        }
    }

    /// Process an event and deliver the resulting plan.
    ///
    /// Returns the plan that was delivered.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is not allowed in the session's state
    /// or is malformed. Nothing is mutated or delivered in that case.
    pub fn handle(
        &self,
        session: &mut Session,
        event: InboundEvent,
    ) -> Result<DeliveryPlan, RouterError> {
        let plan = self.plan(session, event)?;
        plan.deliver(&*self.gateway);
        Ok(plan)
    }

    /// Process an event without delivering anything.
    ///
    /// State changes (presence, bindings, session) are applied; the caller
    /// owns delivery of the returned plan.
    ///
    /// # Errors
    ///
    /// Same as [`handle`](Self::handle).
    pub fn plan(
        &self,
        session: &mut Session,
        event: InboundEvent,
    ) -> Result<DeliveryPlan, RouterError> {
        if session.is_closed() {
            trace!(connection = %session.id(), event = event.name(), "Ignoring event on closed session");
            return Ok(DeliveryPlan::new());
        }

        match event {
            InboundEvent::Register { sender } => self.register(session, sender),

            InboundEvent::Chat { sender, content } => {
                let sender = self.effective_sender(session, sender, "chat")?;
                self.check_content(&content)?;

                let mut plan = DeliveryPlan::new();
                plan.broadcast(Topic::Public, Message::chat(sender, content));
                Ok(plan)
            }

            InboundEvent::Private {
                sender,
                content,
                receiver,
            } => {
                let sender = self.effective_sender(session, sender, "private")?;
                let receiver = receiver
                    .filter(|r| !r.as_str().trim().is_empty())
                    .ok_or(ValidationError::MissingReceiver)?;
                self.check_content(&content)?;

                debug!(connection = %session.id(), from = %sender, to = %receiver, "Private message");
                let mut plan = DeliveryPlan::new();
                plan.unicast(
                    receiver.clone(),
                    Message::private(sender, receiver, content),
                );
                Ok(plan)
            }

            InboundEvent::Leave { sender } => {
                let sender = self.effective_sender(session, sender, "leave")?;
                session.set_state(SessionState::Closed);
                let bound = self.bindings.unbind(session.id());

                let mut plan = self.leave(sender.clone());
                // The connection is gone either way; its own identity leaves too.
                if let Some(bound) = bound.filter(|bound| *bound != sender) {
                    debug!(
                        connection = %session.id(),
                        claimed = %sender,
                        bound = %bound,
                        "Leave for another identity"
                    );
                    plan.append(self.leave(bound));
                }
                Ok(plan)
            }
        }
    }

    /// Handle the transport closing the connection.
    ///
    /// Runs the leave path if the session joined and has not left yet.
    /// Calling it again, or on a session that never joined, does nothing.
    pub fn disconnect(&self, session: &mut Session) -> DeliveryPlan {
        let previous = session.set_state(SessionState::Closed);
        if previous == SessionState::Closed {
            return DeliveryPlan::new();
        }

        let plan = match self.bindings.resolve(session.id()) {
            Some(identity) => {
                self.bindings.unbind(session.id());
                self.leave(identity)
            }
            None => {
                debug!(connection = %session.id(), "Disconnected without joining");
                DeliveryPlan::new()
            }
        };

        plan.deliver(&*self.gateway);
        plan
    }

    fn register(
        &self,
        session: &mut Session,
        sender: Identity,
    ) -> Result<DeliveryPlan, RouterError> {
        if let SessionState::Joined(current) = session.state() {
            return Err(ProtocolError::AlreadyJoined(current.clone()).into());
        }

        validate_identity(sender.as_str(), self.config.max_identity_length)?;
        self.bindings.bind(session.id(), sender.clone())?;
        let snapshot = self.presence.join(sender.clone());
        session.set_state(SessionState::Joined(sender.clone()));

        info!(connection = %session.id(), identity = %sender, online = snapshot.len(), "Joined");

        let mut plan = DeliveryPlan::new();
        plan.broadcast(Topic::Public, Message::join_notice(sender));
        plan.broadcast(Topic::Users, snapshot);
        Ok(plan)
    }

    fn leave(&self, identity: Identity) -> DeliveryPlan {
        let snapshot = self.presence.leave(&identity);

        info!(identity = %identity, online = snapshot.len(), "Left");

        let mut plan = DeliveryPlan::new();
        plan.broadcast(Topic::Public, Message::leave_notice(identity));
        plan.broadcast(Topic::Users, snapshot);
        plan
    }

    /// Resolve who an event is from.
    fn effective_sender(
        &self,
        session: &Session,
        claimed: Identity,
        event: &'static str,
    ) -> Result<Identity, ProtocolError> {
        let bound = session.identity().ok_or(ProtocolError::NotJoined(event))?;

        if self.config.trust_client_sender {
            return Ok(claimed);
        }
        if &claimed != bound {
            debug!(connection = %session.id(), claimed = %claimed, bound = %bound, "Overriding claimed sender");
        }
        Ok(bound.clone())
    }

    fn check_content(&self, content: &str) -> Result<(), ValidationError> {
        if content.len() > self.config.max_content_length {
            return Err(ValidationError::ContentTooLong {
                len: content.len(),
                max: self.config.max_content_length,
            });
        }
        Ok(())
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of identities online.
    pub online: usize,
    /// Number of connections bound to an identity.
    pub bound_connections: usize,
}
