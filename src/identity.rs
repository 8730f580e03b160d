//! Identity provider contract.
//!
//! Authentication lives outside the engine. The engine only asks who it is
//! acting for: id, role, and (for managers) the assigned team.

use std::collections::HashMap;

use crate::config::UserEntry;
use crate::error::{Error, Result};
use crate::model::{CurrentUser, Role, UserId};

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Result<CurrentUser>;
}

/// A fixed identity, e.g. one resolved per request.
#[derive(Debug, Clone)]
pub struct StaticIdentity(CurrentUser);

impl StaticIdentity {
    pub fn new(user: CurrentUser) -> Self {
        Self(user)
    }

    pub fn manager(id: UserId, team: impl IntoIterator<Item = UserId>) -> Self {
        Self(CurrentUser {
            id,
            role: Role::Manager,
            assigned_team_ids: team.into_iter().collect(),
        })
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Result<CurrentUser> {
        Ok(self.0.clone())
    }
}

/// Known users, loaded from the engine config.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    users: HashMap<UserId, CurrentUser>,
}

impl Directory {
    pub fn new(users: impl IntoIterator<Item = CurrentUser>) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
        }
    }

    pub fn from_entries(entries: &[UserEntry]) -> Self {
        Self::new(entries.iter().map(|e| CurrentUser {
            id: e.id,
            role: e.role,
            assigned_team_ids: e.team.clone(),
        }))
    }

    pub fn get(&self, id: UserId) -> Option<&CurrentUser> {
        self.users.get(&id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Fail unless `user` holds `role`.
pub fn require_role(user: &CurrentUser, role: Role) -> Result<()> {
    if user.role == role {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "user {} is a {}, this needs a {role}",
            user.id, user.role
        )))
    }
}
