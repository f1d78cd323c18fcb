// src/nat/turn/allocation.rs
//! TURN allocation state machine (RFC 5766 Sections 6 and 9)
//!
//! One session owns one stream and has at most one request outstanding.
//! Each response decides the next state:
//!
//! ```text
//! Unauthenticated ──401──▶ Challenged ──sign──▶ Authenticated ──▶ Allocated
//!        │                                                           │
//!        └──────────── anonymous success ───────────────────────────▶┤
//!                                                                    ▼
//!                        PermissionGranted ◀── PermissionRequested ──┘
//!                        PermissionFailed  ◀──┘
//! ```
//!
//! Any step may end in `Rejected`.

use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::nat::error::{AllocationError, NatError};
use crate::nat::stun::{
    append_integrity, derive_key, verify_integrity, Attribute, AttributeType, AuthKey,
    Message, MessageClass, MessageType, StunCodec, StunFrame, TransactionId,
};
use super::config::TurnProbeConfig;

/// Credentials bound to a session after a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAuth {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub key: AuthKey,
}

/// A granted allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    /// XOR-RELAYED-ADDRESS
    pub relayed: SocketAddr,
    /// XOR-MAPPED-ADDRESS, when the server reports it
    pub reflexive: Option<SocketAddr>,
    /// LIFETIME in seconds
    pub lifetime: Option<u32>,
    /// `None` when the server allocated without a challenge
    pub auth: Option<SessionAuth>,
}

/// Allocation attempt state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationState {
    /// Nothing sent yet
    Unauthenticated,
    /// Server answered 401 with these values
    Challenged { realm: String, nonce: String },
    /// Signed Allocate built, not yet sent
    Authenticated {
        auth: SessionAuth,
        transaction_id: TransactionId,
        request: Bytes,
    },
    Allocated(Allocation),
    /// CreatePermission sent, awaiting the answer
    PermissionRequested {
        allocation: Allocation,
        peer: IpAddr,
        transaction_id: TransactionId,
    },
    PermissionGranted(Allocation),
    PermissionFailed {
        allocation: Allocation,
        error: AllocationError,
    },
    Rejected(AllocationError),
}

impl AllocationState {
    /// Short state label for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "Unauthenticated",
            Self::Challenged { .. } => "Challenged",
            Self::Authenticated { .. } => "Authenticated",
            Self::Allocated(_) => "Allocated",
            Self::PermissionRequested { .. } => "PermissionRequested",
            Self::PermissionGranted(_) => "PermissionGranted",
            Self::PermissionFailed { .. } => "PermissionFailed",
            Self::Rejected(_) => "Rejected",
        }
    }
}

/// Serialisable failure description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeFailure {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    pub message: String,
}

impl From<&AllocationError> for ProbeFailure {
    fn from(err: &AllocationError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one allocation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationResult {
    pub relayed_address: Option<SocketAddr>,
    pub reflexive_address: Option<SocketAddr>,
    pub lifetime_seconds: Option<u32>,
    pub permission_granted: bool,
    pub authenticated: bool,
    pub error: Option<ProbeFailure>,
}

impl AllocationResult {
    /// Result for an attempt that never got a session
    pub fn failed(error: &AllocationError) -> Self {
        Self {
            relayed_address: None,
            reflexive_address: None,
            lifetime_seconds: None,
            permission_granted: false,
            authenticated: false,
            error: Some(error.into()),
        }
    }

    /// Build the result from a terminal state.
    ///
    /// `allocation` is the last allocation the session reached, so a
    /// failure after allocating still reports the relayed address.
    pub fn from_terminal(state: &AllocationState, allocation: Option<&Allocation>) -> Self {
        let mut result = Self {
            relayed_address: allocation.map(|a| a.relayed),
            reflexive_address: allocation.and_then(|a| a.reflexive),
            lifetime_seconds: allocation.and_then(|a| a.lifetime),
            permission_granted: false,
            authenticated: allocation.map_or(false, |a| a.auth.is_some()),
            error: None,
        };

        match state {
            AllocationState::PermissionGranted(_) => result.permission_granted = true,
            AllocationState::PermissionFailed { error, .. } | AllocationState::Rejected(error) => {
                result.error = Some(error.into());
            }
            _ => {}
        }

        result
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// One allocation attempt over an owned duplex stream
pub struct AllocationSession<S> {
    framed: Framed<S, StunCodec>,
    config: TurnProbeConfig,
    cached_key: Option<(String, AuthKey)>,
    allocation: Option<Allocation>,
}

impl<S> AllocationSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Take ownership of a connected stream
    pub fn new(stream: S, config: TurnProbeConfig) -> Self {
        Self {
            framed: Framed::new(stream, StunCodec::new()),
            config,
            cached_key: None,
            allocation: None,
        }
    }

    /// Whether `state` ends the attempt
    pub fn is_terminal(&self, state: &AllocationState) -> bool {
        match state {
            AllocationState::Allocated(_) => self.config.peer.is_none(),
            AllocationState::PermissionGranted(_)
            | AllocationState::PermissionFailed { .. }
            | AllocationState::Rejected(_) => true,
            _ => false,
        }
    }

    /// Run the handshake to completion, close the stream and report.
    pub async fn run(mut self) -> AllocationResult {
        let state = self.run_until_terminal().await;
        self.close().await;

        let result = AllocationResult::from_terminal(&state, self.allocation.as_ref());
        match &state {
            AllocationState::Rejected(err) | AllocationState::PermissionFailed { error: err, .. } => {
                warn!("Allocation attempt ended in {}: {}", state.name(), err);
            }
            _ => info!("Allocation attempt ended in {}", state.name()),
        }
        result
    }

    /// Step from `Unauthenticated` until a terminal state. Does not close.
    pub async fn run_until_terminal(&mut self) -> AllocationState {
        let mut state = AllocationState::Unauthenticated;
        while !self.is_terminal(&state) {
            state = self.step(state).await;
        }
        state
    }

    /// Flush and shut down the stream
    pub async fn close(&mut self) {
        if let Err(e) = SinkExt::<Bytes>::close(&mut self.framed).await {
            debug!("Error while closing TURN connection: {}", e);
        }
    }

    /// Perform one transition
    pub async fn step(&mut self, state: AllocationState) -> AllocationState {
        let from = state.name();
        let next = match state {
            AllocationState::Unauthenticated => self.probe_allocate().await,
            AllocationState::Challenged { realm, nonce } => self.sign_allocate(realm, nonce),
            AllocationState::Authenticated { auth, transaction_id, request } => {
                self.send_signed_allocate(auth, transaction_id, request).await
            }
            AllocationState::Allocated(allocation) => self.request_permission(allocation).await,
            AllocationState::PermissionRequested { allocation, peer, transaction_id } => {
                self.await_permission(allocation, peer, transaction_id).await
            }
            terminal => terminal,
        };

        debug!("TURN state {} -> {}", from, next.name());
        next
    }

    /// Unauthenticated -> Challenged | Allocated | Rejected
    async fn probe_allocate(&mut self) -> AllocationState {
        let tid = TransactionId::new();
        let mut msg = Message::new(MessageType::AllocateRequest, tid)
            .with_attribute(Attribute::requested_transport(self.config.requested_transport));
        if let Some(username) = &self.config.username {
            msg.add_attribute(Attribute::username(username));
        }
        self.add_software(&mut msg);

        let request = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => return AllocationState::Rejected(AllocationError::ProtocolViolation(e.to_string())),
        };

        debug!("Sending unauthenticated Allocate (transaction {})", tid);
        if let Err(e) = self.send(request).await {
            return AllocationState::Rejected(e);
        }
        let frame = match self.receive(tid, MessageType::AllocateRequest).await {
            Ok(frame) => frame,
            Err(e) => return AllocationState::Rejected(e),
        };
        let response = frame.message;

        if response.message_type.class() == MessageClass::SuccessResponse {
            info!("Server allocated without authentication");
            return self.accept_allocation(&response, None);
        }

        let Some(error) = response.error_code() else {
            return AllocationState::Rejected(AllocationError::ProtocolViolation(
                "error response without ERROR-CODE".into(),
            ));
        };

        if error.code != 401 {
            return AllocationState::Rejected(AllocationError::ServerRejected {
                code: error.code,
                reason: error.reason,
            });
        }

        match (response.realm(), response.nonce()) {
            (Some(realm), Some(nonce)) => {
                debug!("Challenged: realm={:?}", realm);
                AllocationState::Challenged {
                    realm: realm.to_string(),
                    nonce: nonce.to_string(),
                }
            }
            _ => AllocationState::Rejected(AllocationError::AuthChallengeMissing),
        }
    }

    /// Challenged -> Authenticated | Rejected
    fn sign_allocate(&mut self, realm: String, nonce: String) -> AllocationState {
        let Some((username, password)) = self.config.credentials() else {
            return AllocationState::Rejected(AllocationError::ServerRejected {
                code: 401,
                reason: "Unauthorized (server requires credentials)".into(),
            });
        };
        let (username, password) = (username.to_string(), password.to_string());
        let key = self.key_for(&username, &realm, &password);

        let tid = TransactionId::new();
        let mut msg = Message::new(MessageType::AllocateRequest, tid)
            .with_attribute(Attribute::requested_transport(self.config.requested_transport))
            .with_attribute(Attribute::username(&username))
            .with_attribute(Attribute::realm(&realm))
            .with_attribute(Attribute::nonce(&nonce));
        self.add_software(&mut msg);

        let request = match msg.encode().map_err(NatError::from).and_then(|b| append_integrity(&b, &key)) {
            Ok(bytes) => bytes,
            Err(e) => return AllocationState::Rejected(e.into()),
        };

        AllocationState::Authenticated {
            auth: SessionAuth { username, realm, nonce, key },
            transaction_id: tid,
            request,
        }
    }

    /// Authenticated -> Allocated | Rejected
    async fn send_signed_allocate(
        &mut self,
        auth: SessionAuth,
        tid: TransactionId,
        request: Bytes,
    ) -> AllocationState {
        debug!("Sending signed Allocate (transaction {})", tid);
        if let Err(e) = self.send(request).await {
            return AllocationState::Rejected(e);
        }
        let frame = match self.receive(tid, MessageType::AllocateRequest).await {
            Ok(frame) => frame,
            Err(e) => return AllocationState::Rejected(e),
        };
        check_response_integrity(&frame, &auth.key);
        let response = frame.message;

        match response.message_type.class() {
            MessageClass::SuccessResponse => self.accept_allocation(&response, Some(auth)),
            _ => AllocationState::Rejected(server_error(&response)),
        }
    }

    /// Allocated -> PermissionRequested | Rejected
    async fn request_permission(&mut self, allocation: Allocation) -> AllocationState {
        let Some(peer) = self.config.peer else {
            return AllocationState::Allocated(allocation);
        };

        let tid = TransactionId::new();
        let peer_addr = SocketAddr::new(peer, 0);
        let mut msg = Message::new(MessageType::CreatePermissionRequest, tid)
            .with_attribute(Attribute::xor_address(AttributeType::XorPeerAddress, &peer_addr, &tid));
        if let Some(auth) = &allocation.auth {
            msg.add_attribute(Attribute::username(&auth.username));
            msg.add_attribute(Attribute::realm(&auth.realm));
            msg.add_attribute(Attribute::nonce(&auth.nonce));
        }
        self.add_software(&mut msg);

        let encoded = msg.encode().map_err(NatError::from).and_then(|bytes| match &allocation.auth {
            Some(auth) => append_integrity(&bytes, &auth.key),
            None => Ok(bytes),
        });
        let request = match encoded {
            Ok(bytes) => bytes,
            Err(e) => return AllocationState::Rejected(e.into()),
        };

        debug!("Sending CreatePermission for {} (transaction {})", peer, tid);
        if let Err(e) = self.send(request).await {
            return AllocationState::Rejected(e);
        }

        AllocationState::PermissionRequested {
            allocation,
            peer,
            transaction_id: tid,
        }
    }

    /// PermissionRequested -> PermissionGranted | PermissionFailed | Rejected
    async fn await_permission(
        &mut self,
        allocation: Allocation,
        peer: IpAddr,
        tid: TransactionId,
    ) -> AllocationState {
        let frame = match self.receive(tid, MessageType::CreatePermissionRequest).await {
            Ok(frame) => frame,
            Err(e) => return AllocationState::Rejected(e),
        };
        if let Some(auth) = &allocation.auth {
            check_response_integrity(&frame, &auth.key);
        }
        let response = frame.message;

        match response.message_type.class() {
            MessageClass::SuccessResponse => {
                info!("Permission granted for peer {}", peer);
                AllocationState::PermissionGranted(allocation)
            }
            _ => {
                let error = server_error(&response);
                if error.code() == Some(438) {
                    warn!("Nonce went stale before CreatePermission; not re-challenging");
                }
                AllocationState::PermissionFailed { allocation, error }
            }
        }
    }

    /// Read the allocation out of a success response
    fn accept_allocation(&mut self, response: &Message, auth: Option<SessionAuth>) -> AllocationState {
        let Some(relayed) = response.xor_address(AttributeType::XorRelayedAddress) else {
            return AllocationState::Rejected(AllocationError::ProtocolViolation(
                "Allocate success without XOR-RELAYED-ADDRESS".into(),
            ));
        };

        let allocation = Allocation {
            relayed,
            reflexive: response.xor_address(AttributeType::XorMappedAddress),
            lifetime: response.lifetime(),
            auth,
        };
        info!(
            "Allocated relay {} (reflexive {:?}, lifetime {:?}s)",
            allocation.relayed, allocation.reflexive, allocation.lifetime
        );

        self.allocation = Some(allocation.clone());
        AllocationState::Allocated(allocation)
    }

    /// Long-term key for `realm`, reusing the cached one when the realm matches
    fn key_for(&mut self, username: &str, realm: &str, password: &str) -> AuthKey {
        if let Some((cached_realm, key)) = &self.cached_key {
            if cached_realm == realm {
                return key.clone();
            }
        }
        let key = derive_key(username, realm, password);
        self.cached_key = Some((realm.to_string(), key.clone()));
        key
    }

    fn add_software(&self, msg: &mut Message) {
        if let Some(software) = &self.config.software {
            msg.add_attribute(Attribute::software(software));
        }
    }

    /// Write one request. Writes are not raced against the deadline.
    async fn send(&mut self, request: Bytes) -> Result<(), AllocationError> {
        self.framed.send(request).await.map_err(AllocationError::from)
    }

    /// Wait for the response to `tid` within the configured deadline
    async fn receive(
        &mut self,
        tid: TransactionId,
        request_type: MessageType,
    ) -> Result<StunFrame, AllocationError> {
        let frame = match timeout(self.config.timeout, self.framed.next()).await {
            Err(_) => return Err(AllocationError::Timeout(self.config.timeout)),
            Ok(None) => {
                return Err(AllocationError::Transport("connection closed by peer".into()))
            }
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(Some(Ok(frame))) => frame,
        };

        let msg = &frame.message;
        if msg.transaction_id != tid {
            return Err(AllocationError::ProtocolViolation(format!(
                "response transaction {} does not match request {}",
                msg.transaction_id, tid
            )));
        }
        if !msg.message_type.answers(request_type) {
            return Err(AllocationError::ProtocolViolation(format!(
                "unexpected message type 0x{:04X} in reply to 0x{:04X}",
                msg.message_type.as_u16(),
                request_type.as_u16()
            )));
        }

        Ok(frame)
    }
}

/// ERROR-CODE of an error response as a terminal error
fn server_error(response: &Message) -> AllocationError {
    match response.error_code() {
        Some(error) => AllocationError::ServerRejected {
            code: error.code,
            reason: error.reason,
        },
        None => AllocationError::ProtocolViolation("error response without ERROR-CODE".into()),
    }
}

/// Log whether a response to a signed request authenticates
fn check_response_integrity(frame: &StunFrame, key: &AuthKey) {
    if frame.message.get_attribute(AttributeType::MessageIntegrity).is_none() {
        debug!("Response carries no MESSAGE-INTEGRITY");
    } else if verify_integrity(&frame.raw, key) {
        debug!("Response MESSAGE-INTEGRITY verified");
    } else {
        warn!("Response MESSAGE-INTEGRITY does not verify with the session key");
    }
}
