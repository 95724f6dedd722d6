//! Group Management
//!
//! Named, persistent member sets used for scoped fan-out. Groups are never
//! deleted; an empty group stays around and can be joined again.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;

use crate::outbox::{ConnectionId, Peer};

/// A named set of member connections
#[derive(Debug)]
pub struct Group {
    members: HashMap<ConnectionId, Peer>,
}

impl Group {
    fn new(creator: &Peer) -> Self {
        let mut members = HashMap::new();
        members.insert(creator.id, creator.clone());
        Self { members }
    }

    pub fn is_member(&self, connection: ConnectionId) -> bool {
        self.members.contains_key(&connection)
    }

    fn deliver_except(&self, line: &str, exclude: Option<ConnectionId>) -> usize {
        self.members
            .values()
            .filter(|p| Some(p.id) != exclude)
            .filter(|p| p.deliver(line))
            .count()
    }
}

/// Group-related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GroupError {
    #[error("Group name must be non-empty and contain no spaces")]
    InvalidName,
    #[error("Group already exists")]
    AlreadyExists,
    #[error("Group does not exist")]
    NoSuchGroup,
    #[error("Already a member of the group")]
    AlreadyMember,
    #[error("Not a member of the group")]
    NotMember,
}

/// Names are non-empty and contain no whitespace
pub fn validate_name(name: &str) -> Result<(), GroupError> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        Err(GroupError::InvalidName)
    } else {
        Ok(())
    }
}

/// Manages all groups
pub struct GroupRegistry {
    groups: Mutex<HashMap<String, Group>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Create a group; the creator is its first member
    pub fn create(&self, name: &str, creator: &Peer) -> Result<(), GroupError> {
        validate_name(name)?;
        let mut groups = self.groups.lock();
        if groups.contains_key(name) {
            return Err(GroupError::AlreadyExists);
        }
        groups.insert(name.to_string(), Group::new(creator));
        log::info!("Created group {} (creator {})", name, creator.id);
        Ok(())
    }

    pub fn join(&self, name: &str, peer: &Peer) -> Result<(), GroupError> {
        validate_name(name)?;
        let mut groups = self.groups.lock();
        let group = groups.get_mut(name).ok_or(GroupError::NoSuchGroup)?;
        if group.is_member(peer.id) {
            return Err(GroupError::AlreadyMember);
        }
        group.members.insert(peer.id, peer.clone());
        log::info!("Connection {} joined group {}", peer.id, name);
        Ok(())
    }

    pub fn leave(&self, name: &str, connection: ConnectionId) -> Result<(), GroupError> {
        validate_name(name)?;
        let mut groups = self.groups.lock();
        let group = groups.get_mut(name).ok_or(GroupError::NoSuchGroup)?;
        group
            .members
            .remove(&connection)
            .ok_or(GroupError::NotMember)?;
        log::info!("Connection {} left group {}", connection, name);
        Ok(())
    }

    /// Deliver a message to every member except the poster, who must be a
    /// member. Returns how many members accepted it.
    pub fn post(
        &self,
        name: &str,
        connection: ConnectionId,
        message: impl fmt::Display,
    ) -> Result<usize, GroupError> {
        validate_name(name)?;
        let groups = self.groups.lock();
        let group = groups.get(name).ok_or(GroupError::NoSuchGroup)?;
        if !group.is_member(connection) {
            return Err(GroupError::NotMember);
        }
        Ok(group.deliver_except(&message.to_string(), Some(connection)))
    }

    /// Server notice to a group's members, without a membership check
    pub fn announce(
        &self,
        name: &str,
        exclude: Option<ConnectionId>,
        message: impl fmt::Display,
    ) -> usize {
        let groups = self.groups.lock();
        groups
            .get(name)
            .map(|g| g.deliver_except(&message.to_string(), exclude))
            .unwrap_or(0)
    }

    /// Drop a connection from every group. Returns how many groups it was in.
    pub fn remove_member_everywhere(&self, connection: ConnectionId) -> usize {
        let mut groups = self.groups.lock();
        groups
            .values_mut()
            .filter_map(|g| g.members.remove(&connection))
            .count()
    }

    /// Member ids of a group, or `None` if it does not exist
    pub fn members(&self, name: &str) -> Option<Vec<ConnectionId>> {
        self.groups
            .lock()
            .get(name)
            .map(|g| g.members.keys().copied().collect())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.groups.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Outbox;
    use tokio::sync::mpsc;

    fn peer() -> (Peer, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::channel(16);
        (Peer::new(outbox), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("team").is_ok());
        assert_eq!(validate_name(""), Err(GroupError::InvalidName));
        assert_eq!(validate_name("my team"), Err(GroupError::InvalidName));
        assert_eq!(validate_name("tab\tname"), Err(GroupError::InvalidName));
    }

    #[test]
    fn test_create_makes_creator_member() {
        let groups = GroupRegistry::new();
        let (alice, _rx) = peer();

        groups.create("team", &alice).unwrap();
        assert_eq!(groups.members("team"), Some(vec![alice.id]));
        assert_eq!(groups.create("team", &alice), Err(GroupError::AlreadyExists));
        assert_eq!(groups.join("team", &alice), Err(GroupError::AlreadyMember));
    }

    #[test]
    fn test_invalid_name_checked_before_existence() {
        let groups = GroupRegistry::new();
        let (alice, _rx) = peer();

        assert_eq!(groups.create("", &alice), Err(GroupError::InvalidName));
        assert_eq!(groups.join("no such", &alice), Err(GroupError::InvalidName));
        assert_eq!(groups.leave("a b", alice.id), Err(GroupError::InvalidName));
        assert!(groups.is_empty());
    }

    #[test]
    fn test_join_is_idempotent() {
        let groups = GroupRegistry::new();
        let (alice, _alice_rx) = peer();
        let (bob, mut bob_rx) = peer();
        groups.create("team", &alice).unwrap();

        assert_eq!(groups.join("team", &bob), Ok(()));
        assert_eq!(groups.join("team", &bob), Err(GroupError::AlreadyMember));
        assert_eq!(groups.members("team").unwrap().len(), 2);

        assert_eq!(groups.post("team", alice.id, "[Group team] alice: hi"), Ok(1));
        assert_eq!(drain(&mut bob_rx), vec!["[Group team] alice: hi\n"]);
    }

    #[test]
    fn test_post_excludes_poster_and_requires_membership() {
        let groups = GroupRegistry::new();
        let (alice, mut alice_rx) = peer();
        let (bob, mut bob_rx) = peer();
        groups.create("team", &alice).unwrap();

        assert_eq!(groups.post("team", bob.id, "x"), Err(GroupError::NotMember));
        assert_eq!(groups.post("ghost", alice.id, "x"), Err(GroupError::NoSuchGroup));

        groups.join("team", &bob).unwrap();
        assert_eq!(groups.post("team", alice.id, "hello"), Ok(1));
        assert!(drain(&mut alice_rx).is_empty());
        assert_eq!(drain(&mut bob_rx), vec!["hello\n"]);
    }

    #[test]
    fn test_post_skips_full_member_queue() {
        let groups = GroupRegistry::new();
        let (alice, _alice_rx) = peer();
        let (slow_outbox, mut slow_rx) = Outbox::channel(1);
        let slow = Peer::new(slow_outbox);
        let (carol, mut carol_rx) = peer();
        groups.create("team", &alice).unwrap();
        groups.join("team", &slow).unwrap();
        groups.join("team", &carol).unwrap();
        slow.outbox.send_line("backlog").unwrap();

        assert_eq!(groups.post("team", alice.id, "hello"), Ok(1));
        assert_eq!(drain(&mut carol_rx), vec!["hello\n"]);
        assert_eq!(drain(&mut slow_rx), vec!["backlog\n"]);
    }

    #[test]
    fn test_groups_are_isolated() {
        let groups = GroupRegistry::new();
        let (alice, _alice_rx) = peer();
        let (bob, mut bob_rx) = peer();
        let (carol, mut carol_rx) = peer();
        groups.create("a", &alice).unwrap();
        groups.create("b", &carol).unwrap();
        groups.join("a", &bob).unwrap();

        groups.post("a", alice.id, "only for a").unwrap();
        assert_eq!(drain(&mut bob_rx), vec!["only for a\n"]);
        assert!(drain(&mut carol_rx).is_empty());
    }

    #[test]
    fn test_leave_and_rejoin_empty_group() {
        let groups = GroupRegistry::new();
        let (alice, _rx) = peer();
        groups.create("team", &alice).unwrap();

        assert_eq!(groups.leave("team", alice.id), Ok(()));
        assert_eq!(groups.leave("team", alice.id), Err(GroupError::NotMember));
        assert_eq!(groups.leave("ghost", alice.id), Err(GroupError::NoSuchGroup));

        // Empty groups persist
        assert!(groups.exists("team"));
        assert_eq!(groups.members("team"), Some(vec![]));
        assert_eq!(groups.join("team", &alice), Ok(()));
    }

    #[test]
    fn test_remove_member_everywhere() {
        let groups = GroupRegistry::new();
        let (alice, _alice_rx) = peer();
        let (bob, _bob_rx) = peer();
        groups.create("a", &alice).unwrap();
        groups.create("b", &alice).unwrap();
        groups.create("c", &bob).unwrap();
        groups.join("b", &bob).unwrap();

        assert_eq!(groups.remove_member_everywhere(alice.id), 2);
        assert_eq!(groups.remove_member_everywhere(alice.id), 0);
        assert_eq!(groups.members("a"), Some(vec![]));
        assert_eq!(groups.members("b"), Some(vec![bob.id]));
        assert_eq!(groups.len(), 3);
    }

    #[test]
    fn test_announce_skips_excluded() {
        let groups = GroupRegistry::new();
        let (alice, mut alice_rx) = peer();
        let (bob, mut bob_rx) = peer();
        groups.create("team", &alice).unwrap();
        groups.join("team", &bob).unwrap();

        assert_eq!(groups.announce("team", Some(bob.id), "bob joined"), 1);
        assert_eq!(drain(&mut alice_rx), vec!["bob joined\n"]);
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(groups.announce("ghost", None, "nobody"), 0);
    }
}
