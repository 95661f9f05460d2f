use indexmap::IndexSet;

use crate::hc_digest::sha256_hex;
use crate::hc_interface::{parse_field, DecodeError, Digest, NodeId, PAYLOAD_SEPARATOR};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub origin: NodeId,
    pub payload: String,
}

impl Transaction {
    pub fn new(origin: impl Into<NodeId>, payload: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    /// `"{origin};{payload}"`
    pub fn encode(&self) -> String {
        format!("{};{}", self.origin, self.payload)
    }

    pub fn decode(data: &str) -> Result<Self, DecodeError> {
        let (origin, payload) = data
            .split_once(';')
            .ok_or(DecodeError::MissingField("payload"))?;
        Ok(Self::new(origin, payload))
    }

    pub fn hash(&self) -> Digest {
        sha256_hex(&self.encode())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub creator: NodeId,
    pub previous_hash: Digest,
    pub previous_chunk_hash: Digest,
    pub payload: String,
}

impl Block {
    pub fn new(creator: impl Into<NodeId>, payload: impl Into<String>) -> Self {
        Self {
            height: 0,
            creator: creator.into(),
            previous_hash: String::new(),
            previous_chunk_hash: String::new(),
            payload: payload.into(),
        }
    }

    /// Block whose payload is the given transactions joined in order.
    pub fn from_transactions<'a>(
        creator: impl Into<NodeId>,
        transactions: impl IntoIterator<Item = &'a Transaction>,
    ) -> Self {
        let payload = transactions
            .into_iter()
            .map(Transaction::encode)
            .collect::<Vec<_>>()
            .join(PAYLOAD_SEPARATOR);
        Self::new(creator, payload)
    }

    /// `"{height}:{creator}:{previous_hash}:{previous_chunk_hash}:{payload}"`
    pub fn encode(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.height, self.creator, self.previous_hash, self.previous_chunk_hash, self.payload
        )
    }

    // the payload may itself contain ':' so only the first four separators count
    pub fn decode(data: &str) -> Result<Self, DecodeError> {
        let mut parts = data.splitn(5, ':');
        let height = parts.next().ok_or(DecodeError::MissingField("height"))?;
        let creator = parts.next().ok_or(DecodeError::MissingField("creator"))?;
        let previous_hash = parts
            .next()
            .ok_or(DecodeError::MissingField("previous_hash"))?;
        let previous_chunk_hash = parts
            .next()
            .ok_or(DecodeError::MissingField("previous_chunk_hash"))?;
        let payload = parts.next().ok_or(DecodeError::MissingField("payload"))?;

        Ok(Self {
            height: parse_field("height", height)?,
            creator: creator.to_string(),
            previous_hash: previous_hash.to_string(),
            previous_chunk_hash: previous_chunk_hash.to_string(),
            payload: payload.to_string(),
        })
    }

    pub fn hash(&self) -> Digest {
        sha256_hex(&self.encode())
    }

    /// Raw payload entries in order. An empty payload has no entries.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.payload
            .split(PAYLOAD_SEPARATOR)
            .filter(|entry| !entry.is_empty())
    }

    pub fn transactions(&self) -> impl Iterator<Item = Result<Transaction, DecodeError>> + '_ {
        self.entries().map(Transaction::decode)
    }

    pub fn wire_len(&self) -> usize {
        self.encode().len()
    }
}

/// Rolling checkpoint over a contiguous run of blocks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockChunk {
    pub previous_chunk_hash: Digest,
    pub members: IndexSet<Digest>,
}

impl BlockChunk {
    pub fn new(previous_chunk_hash: impl Into<Digest>) -> Self {
        Self {
            previous_chunk_hash: previous_chunk_hash.into(),
            members: IndexSet::new(),
        }
    }

    pub fn add_member(&mut self, block_hash: Digest) {
        self.members.insert(block_hash);
    }

    /// `"{previous_chunk_hash}:{h1}||{h2}||..."`
    pub fn encode(&self) -> String {
        let members: Vec<&str> = self.members.iter().map(String::as_str).collect();
        format!("{}:{}", self.previous_chunk_hash, members.join(PAYLOAD_SEPARATOR))
    }

    pub fn hash(&self) -> Digest {
        sha256_hex(&self.encode())
    }
}
