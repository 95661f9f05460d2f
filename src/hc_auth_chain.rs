use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::hc_blocks::Block;
use crate::hc_chain::Chain;
use crate::hc_interface::{
    parse_field, DecodeError, Digest, NodeId, Permission, GENESIS_HASH, PAYLOAD_SEPARATOR,
};

/// Permission ledger plus the two forger rotations derived from it.
///
/// Authorization block payloads are `"{id} {level}"` entries joined by `||`.
/// Levels only ever go up: an entry that would lower a stored level is ignored.
/// Nodes never granted anything hold no permission at all.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationChain {
    chain: Chain,
    permissions: IndexMap<NodeId, Permission>,
    writers: VecDeque<NodeId>,
    auth_writers: VecDeque<NodeId>,
    /// hashes of accepted blocks as they were received, before restamping
    received: IndexSet<Digest>,
}

impl AuthorizationChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic genesis authorization block built from the initial grants.
    pub fn genesis_block<'a>(grants: impl IntoIterator<Item = (&'a NodeId, &'a Permission)>) -> Block {
        let payload = grants
            .into_iter()
            .map(|(id, level)| format!("{} {}", id, level.level()))
            .collect::<Vec<_>>()
            .join(PAYLOAD_SEPARATOR);
        Block::new(GENESIS_HASH, payload)
    }

    /// Apply and append the genesis grants.
    pub fn seed<'a>(
        &mut self,
        grants: impl IntoIterator<Item = (&'a NodeId, &'a Permission)>,
    ) -> Result<(), DecodeError> {
        let block = Self::genesis_block(grants);
        self.apply(&block)?;
        self.chain.append(block);
        Ok(())
    }

    /// Raise permissions from a block payload and enrol new forgers at the back
    /// of their rotation. The whole payload is validated before anything changes.
    pub fn apply(&mut self, block: &Block) -> Result<(), DecodeError> {
        let mut grants = Vec::new();
        for entry in block.entries() {
            let (id, level) = entry
                .split_once(' ')
                .ok_or(DecodeError::MissingField("level"))?;
            let level = Permission::from_level(parse_field("level", level)?)?;
            grants.push((id.to_string(), level));
        }

        for (id, level) in grants {
            let current = self.permissions.get(&id).copied();
            if current.map_or(true, |held| level > held) {
                debug!("{} raised to {}", id, level);
                self.permissions.insert(id.clone(), level);
            }

            if self.has_permission(&id, Permission::Write) && !self.writers.contains(&id) {
                self.writers.push_back(id.clone());
            }
            if self.has_permission(&id, Permission::WriteAuth) && !self.auth_writers.contains(&id) {
                self.auth_writers.push_back(id);
            }
        }
        Ok(())
    }

    /// Accept an authorization block received from the current auth forger.
    /// Returns `Ok(false)` for a block that was already accepted once.
    pub fn accept(&mut self, block: Block) -> Result<bool, DecodeError> {
        let hash = block.hash();
        if self.received.contains(&hash) {
            return Ok(false);
        }
        self.apply(&block)?;
        self.received.insert(hash);
        self.chain.append(block);
        self.shift_auth_forger();
        Ok(true)
    }

    pub fn has_accepted(&self, hash: &str) -> bool {
        self.received.contains(hash)
    }

    pub fn permission(&self, id: &str) -> Option<Permission> {
        self.permissions.get(id).copied()
    }

    pub fn has_permission(&self, id: &str, required: Permission) -> bool {
        self.permission(id).map_or(false, |held| held >= required)
    }

    /// With no registered writers anybody may forge.
    pub fn is_next_creator(&self, id: &str) -> bool {
        self.writers.front().map_or(true, |next| next == id)
    }

    pub fn is_next_auth_creator(&self, id: &str) -> bool {
        self.auth_writers.front().map_or(true, |next| next == id)
    }

    pub fn next_creator(&self) -> Option<&NodeId> {
        self.writers.front()
    }

    pub fn next_auth_creator(&self) -> Option<&NodeId> {
        self.auth_writers.front()
    }

    pub fn shift_forger(&mut self) {
        self.writers.rotate_left(1.min(self.writers.len()));
    }

    pub fn shift_auth_forger(&mut self) {
        self.auth_writers.rotate_left(1.min(self.auth_writers.len()));
    }

    /// Whether `id` is one of the next `window` forgers in rotation.
    pub fn is_future_block(&self, id: &str, window: usize) -> bool {
        self.writers.iter().take(window).any(|writer| writer == id)
    }

    pub fn writers(&self) -> impl Iterator<Item = &NodeId> {
        self.writers.iter()
    }

    pub fn auth_writers(&self) -> impl Iterator<Item = &NodeId> {
        self.auth_writers.iter()
    }

    pub fn permissions(&self) -> &IndexMap<NodeId, Permission> {
        &self.permissions
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(grants: &[(&str, Permission)]) -> AuthorizationChain {
        let grants: IndexMap<NodeId, Permission> = grants
            .iter()
            .map(|(id, p)| (id.to_string(), *p))
            .collect();
        let mut auth = AuthorizationChain::new();
        auth.seed(&grants).unwrap();
        auth
    }

    #[test]
    fn test_seed_registers_writers_in_grant_order() {
        let auth = seeded(&[
            ("a", Permission::Write),
            ("r", Permission::Read),
            ("b", Permission::WriteAuth),
        ]);
        assert_eq!(auth.writers().cloned().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(auth.auth_writers().cloned().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(auth.chain().height(), 1);
        assert!(auth.has_permission("b", Permission::Publish));
        assert!(auth.has_permission("r", Permission::Read));
        assert!(!auth.has_permission("r", Permission::Publish));
        assert!(!auth.has_permission("stranger", Permission::Read));
    }

    #[test]
    fn test_permission_never_decreases() {
        let mut auth = AuthorizationChain::new();
        auth.apply(&Block::new("x", "n 1")).unwrap();
        auth.apply(&Block::new("x", "n 0")).unwrap();
        assert_eq!(auth.permission("n"), Some(Permission::Publish));

        auth.apply(&Block::new("x", "n 2||n 1")).unwrap();
        assert_eq!(auth.permission("n"), Some(Permission::Write));
        assert_eq!(auth.writers().count(), 1);
    }

    #[test]
    fn test_malformed_grant_changes_nothing() {
        let mut auth = AuthorizationChain::new();
        assert!(auth.apply(&Block::new("x", "a 2||b")).is_err());
        assert!(auth.apply(&Block::new("x", "a 9")).is_err());
        assert!(auth.permissions().is_empty());
    }

    #[test]
    fn test_rotation_closure() {
        let mut auth = seeded(&[
            ("a", Permission::Write),
            ("b", Permission::Write),
            ("c", Permission::WriteAuth),
        ]);
        let first = auth.next_creator().cloned();
        let n = auth.writers().count();
        for step in 0..n {
            auth.shift_forger();
            if step + 1 < n {
                assert_ne!(auth.next_creator().cloned(), first);
            }
        }
        assert_eq!(auth.next_creator().cloned(), first);
    }

    #[test]
    fn test_empty_rotation_admits_anyone() {
        let mut auth = AuthorizationChain::new();
        assert!(auth.is_next_creator("whoever"));
        assert!(auth.next_creator().is_none());
        auth.shift_forger();
        assert!(auth.is_next_auth_creator("whoever"));
    }

    #[test]
    fn test_future_block_window() {
        let grants: Vec<(String, Permission)> =
            (0..7).map(|i| (format!("w{}", i), Permission::Write)).collect();
        let grants: Vec<(&str, Permission)> = grants.iter().map(|(id, p)| (id.as_str(), *p)).collect();
        let auth = seeded(&grants);
        assert!(auth.is_future_block("w0", 5));
        assert!(auth.is_future_block("w4", 5));
        assert!(!auth.is_future_block("w5", 5));
        assert!(!auth.is_future_block("nobody", 5));
    }

    #[test]
    fn test_accept_shifts_auth_rotation() {
        let mut auth = seeded(&[("a", Permission::WriteAuth), ("b", Permission::WriteAuth)]);
        assert!(auth.is_next_auth_creator("a"));
        let mut block = Block::new("a", "c 2");
        block.previous_chunk_hash = GENESIS_HASH.to_string();
        assert!(auth.accept(block).unwrap());
        assert!(auth.is_next_auth_creator("b"));
        assert_eq!(auth.permission("c"), Some(Permission::Write));
        assert_eq!(auth.writers().last().map(String::as_str), Some("c"));
        assert_eq!(auth.chain().height(), 2);
    }

    #[test]
    fn test_accept_ignores_repeated_block() {
        let mut auth = seeded(&[("a", Permission::WriteAuth)]);
        let block = Block::new("a", "c 1");
        let hash = block.hash();

        assert!(auth.accept(block.clone()).unwrap());
        assert!(auth.has_accepted(&hash));
        assert!(!auth.accept(block).unwrap());
        assert_eq!(auth.chain().height(), 2);
        assert!(auth.is_next_auth_creator("a"));
    }
}
