use std::fmt;

use crate::hc_digest::sha256_hex;
use crate::hc_interface::{parse_field, DecodeError, Digest, NodeId, NULL_PAYLOAD};

pub const SIGNAL_KINDS: usize = 11;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SignalKind {
    Active = 0,
    NewBlock = 1,
    NewAuthBlock = 2,
    NewTransaction = 3,
    Ack = 4,
    BlockRequest = 5,
    BlockChunkRequest = 6,
    AuthBlockRequest = 7,
    RequestDeny = 8,
    RequestWait = 9,
    BlockResponse = 10,
}

impl SignalKind {
    pub const ALL: [SignalKind; SIGNAL_KINDS] = [
        SignalKind::Active,
        SignalKind::NewBlock,
        SignalKind::NewAuthBlock,
        SignalKind::NewTransaction,
        SignalKind::Ack,
        SignalKind::BlockRequest,
        SignalKind::BlockChunkRequest,
        SignalKind::AuthBlockRequest,
        SignalKind::RequestDeny,
        SignalKind::RequestWait,
        SignalKind::BlockResponse,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(DecodeError::UnknownSignal(code))
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Active => "ACTIVE",
            SignalKind::NewBlock => "NEW_BLOCK",
            SignalKind::NewAuthBlock => "NEW_AUTH_BLOCK",
            SignalKind::NewTransaction => "NEW_TRANSACTION",
            SignalKind::Ack => "ACK",
            SignalKind::BlockRequest => "BLOCK_REQUEST",
            SignalKind::BlockChunkRequest => "BLOCK_CHUNK_REQUEST",
            SignalKind::AuthBlockRequest => "AUTH_BLOCK_REQUEST",
            SignalKind::RequestDeny => "REQUEST_DENY",
            SignalKind::RequestWait => "REQUEST_WAIT",
            SignalKind::BlockResponse => "BLOCK_RESPONSE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            SignalKind::BlockRequest | SignalKind::BlockChunkRequest | SignalKind::AuthBlockRequest
        )
    }

    /// Requests and ACKs themselves are never acknowledged.
    pub fn requires_ack(self) -> bool {
        self != SignalKind::Ack && !self.is_request()
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One gossiped message. `forward_origin` names the relay that emitted this
/// copy and is not part of the encoding, so every relayed copy shares a hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSignal {
    pub kind: SignalKind,
    pub origin: NodeId,
    pub payload: Option<String>,
    pub forward_origin: NodeId,
}

impl NodeSignal {
    pub fn new(kind: SignalKind, origin: impl Into<NodeId>, payload: Option<String>) -> Self {
        let origin = origin.into();
        Self {
            kind,
            forward_origin: origin.clone(),
            origin,
            payload,
        }
    }

    pub fn active(origin: impl Into<NodeId>, payload: Option<String>) -> Self {
        Self::new(SignalKind::Active, origin, payload)
    }

    pub fn new_block(origin: impl Into<NodeId>, encoded_block: impl Into<String>) -> Self {
        Self::new(SignalKind::NewBlock, origin, Some(encoded_block.into()))
    }

    pub fn new_auth_block(origin: impl Into<NodeId>, encoded_block: impl Into<String>) -> Self {
        Self::new(SignalKind::NewAuthBlock, origin, Some(encoded_block.into()))
    }

    pub fn new_transaction(origin: impl Into<NodeId>, encoded_tx: impl Into<String>) -> Self {
        Self::new(SignalKind::NewTransaction, origin, Some(encoded_tx.into()))
    }

    /// ACK carries the hash of the acknowledged signal.
    pub fn ack(origin: impl Into<NodeId>, acked: &NodeSignal) -> Self {
        Self::new(SignalKind::Ack, origin, Some(acked.hash()))
    }

    pub fn block_request(origin: impl Into<NodeId>, block_hash: impl Into<String>) -> Self {
        Self::new(SignalKind::BlockRequest, origin, Some(block_hash.into()))
    }

    pub fn deny(origin: impl Into<NodeId>, request_hash: Digest) -> Self {
        Self::new(SignalKind::RequestDeny, origin, Some(request_hash))
    }

    pub fn wait(origin: impl Into<NodeId>, request_hash: Digest) -> Self {
        Self::new(SignalKind::RequestWait, origin, Some(request_hash))
    }

    pub fn block_response(origin: impl Into<NodeId>, encoded_block: impl Into<String>) -> Self {
        Self::new(SignalKind::BlockResponse, origin, Some(encoded_block.into()))
    }

    pub fn relayed_by(mut self, relay: impl Into<NodeId>) -> Self {
        self.forward_origin = relay.into();
        self
    }

    pub fn payload_str(&self) -> &str {
        self.payload.as_deref().unwrap_or(NULL_PAYLOAD)
    }

    /// `"{type} {origin} {payload}"`, an absent payload renders as `null`.
    pub fn encode(&self) -> String {
        format!("{} {} {}", self.kind.code(), self.origin, self.payload_str())
    }

    pub fn decode(data: &str) -> Result<Self, DecodeError> {
        let mut parts = data.splitn(3, ' ');
        let code = parts.next().ok_or(DecodeError::MissingField("type"))?;
        let origin = parts.next().ok_or(DecodeError::MissingField("origin"))?;
        let payload = parts.next().ok_or(DecodeError::MissingField("payload"))?;

        let kind = SignalKind::from_code(parse_field("type", code)?)?;
        let payload = (payload != NULL_PAYLOAD).then(|| payload.to_string());
        Ok(Self::new(kind, origin, payload))
    }

    pub fn hash(&self) -> Digest {
        sha256_hex(&self.encode())
    }

    pub fn wire_len(&self) -> usize {
        self.encode().len()
    }
}

impl fmt::Display for NodeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Per-kind message counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalCounters([u64; SIGNAL_KINDS]);

impl SignalCounters {
    pub fn bump(&mut self, kind: SignalKind) {
        self.0[kind.index()] += 1;
    }

    pub fn get(&self, kind: SignalKind) -> u64 {
        self.0[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}
