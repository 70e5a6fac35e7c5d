//! Chat Group Membership
//!
//! Tracks which connected clients are grouped together. A group exists
//! only while it has at least two members; it is created on the first
//! invite and dissolved when membership drops below two.

use std::collections::HashMap;

use thiserror::Error;

use crate::messages::ServerMessage;
use crate::transport::ClientId;

/// Why a membership change was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// The client is not connected
    #[error("Client {0} does not exist")]
    UnknownClient(ClientId),

    /// The invitee already belongs to a group
    #[error("Invitee {0} is already in a group")]
    AlreadyGrouped(ClientId),

    /// A client cannot invite itself
    #[error("Cannot invite yourself")]
    SelfInvite,

    /// The target is not grouped
    #[error("Target {0} is not in any group")]
    NotInGroup(ClientId),

    /// Only the owner, or the member itself, may remove a member
    #[error("Only group owner or self can remove members")]
    NotPermitted,
}

/// A group of clients whose characters converse together
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatGroup {
    /// Group ID, `group_<owner at creation>`
    pub group_id: String,
    /// Current owner
    pub owner: ClientId,
    /// Members in join order
    pub members: Vec<ClientId>,
}

/// Membership registry for every connected client
#[derive(Debug, Default)]
pub struct ChatGroupManager {
    client_group: HashMap<ClientId, Option<String>>,
    groups: HashMap<String, ChatGroup>,
}

impl ChatGroupManager {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly connected client, ungrouped
    pub fn register_client(&mut self, client: ClientId) {
        self.client_group.entry(client).or_insert(None);
    }

    /// Group of `client`, if grouped
    #[must_use]
    pub fn group_of(&self, client: &ClientId) -> Option<&ChatGroup> {
        self.client_group
            .get(client)?
            .as_ref()
            .and_then(|id| self.groups.get(id))
    }

    /// Members of `client`'s group; empty when ungrouped
    #[must_use]
    pub fn members_of(&self, client: &ClientId) -> Vec<ClientId> {
        self.group_of(client)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    /// `group-update` message for `client`
    #[must_use]
    pub fn group_update(&self, client: &ClientId) -> ServerMessage {
        match self.group_of(client) {
            Some(group) => ServerMessage::GroupUpdate {
                members: group.members.clone(),
                is_owner: &group.owner == client,
            },
            None => ServerMessage::GroupUpdate {
                members: Vec::new(),
                is_owner: false,
            },
        }
    }

    /// Add `invitee` to `inviter`'s group, creating it if needed
    ///
    /// Returns the members of the resulting group.
    pub fn add_client_to_group(
        &mut self,
        inviter: &ClientId,
        invitee: &ClientId,
    ) -> Result<Vec<ClientId>, GroupError> {
        if inviter == invitee {
            return Err(GroupError::SelfInvite);
        }
        match self.client_group.get(invitee) {
            None => return Err(GroupError::UnknownClient(invitee.clone())),
            Some(Some(_)) => return Err(GroupError::AlreadyGrouped(invitee.clone())),
            Some(None) => {}
        }

        let group_id = match self.client_group.get(inviter).cloned().flatten() {
            Some(id) => id,
            None => {
                let id = format!("group_{inviter}");
                self.groups.insert(
                    id.clone(),
                    ChatGroup {
                        group_id: id.clone(),
                        owner: inviter.clone(),
                        members: vec![inviter.clone()],
                    },
                );
                self.client_group.insert(inviter.clone(), Some(id.clone()));
                tracing::info!(group = %id, owner = %inviter, "Created group");
                id
            }
        };

        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| GroupError::NotInGroup(inviter.clone()))?;
        group.members.push(invitee.clone());
        let members = group.members.clone();
        self.client_group.insert(invitee.clone(), Some(group_id.clone()));
        tracing::info!(group = %group_id, client = %invitee, "Added client to group");
        Ok(members)
    }

    /// Remove `target` from its group on behalf of `remover`
    ///
    /// Returns every client whose membership changed view, the target
    /// included.
    pub fn remove_client_from_group(
        &mut self,
        remover: &ClientId,
        target: &ClientId,
    ) -> Result<Vec<ClientId>, GroupError> {
        let group = self
            .group_of(target)
            .ok_or_else(|| GroupError::NotInGroup(target.clone()))?;
        if remover != &group.owner && remover != target {
            return Err(GroupError::NotPermitted);
        }
        let affected = group.members.clone();
        self.detach(target);
        self.client_group.insert(target.clone(), None);
        Ok(affected)
    }

    /// Forget a disconnected client
    ///
    /// Returns the members that remain in its former group (empty when the
    /// group was dissolved or the client was ungrouped).
    pub fn remove_client(&mut self, client: &ClientId) -> Vec<ClientId> {
        let remaining = self.detach(client);
        self.client_group.remove(client);
        remaining
    }

    /// Take `client` out of its group, reassigning or dissolving as needed
    fn detach(&mut self, client: &ClientId) -> Vec<ClientId> {
        let Some(group_id) = self.client_group.get(client).cloned().flatten() else {
            return Vec::new();
        };
        let Some(group) = self.groups.get_mut(&group_id) else {
            return Vec::new();
        };
        group.members.retain(|m| m != client);
        tracing::info!(group = %group_id, client = %client, "Removed client from group");

        if group.members.len() < 2 {
            let leftover = group.members.clone();
            self.groups.remove(&group_id);
            for member in leftover {
                self.client_group.insert(member, None);
            }
            tracing::info!(group = %group_id, "Dissolved group");
            return Vec::new();
        }
        if &group.owner == client {
            group.owner = group.members[0].clone();
            tracing::info!(group = %group_id, owner = %group.owner, "Reassigned group owner");
        }
        group.members.clone()
    }
}
