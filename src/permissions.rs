use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;

use crate::types::{ChatId, UserId};

/// Answers whether a user may bypass votes, caps and duplicate checks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PrivilegeCheck: Send + Sync {
    async fn is_privileged(&self, chat: ChatId, user: UserId) -> bool;
}

/// Lista fija de sudoers más administradores por chat registrados en memoria
#[derive(Debug, Default)]
pub struct StaticPrivileges {
    sudo_users: HashSet<UserId>,
    chat_admins: DashMap<ChatId, DashSet<UserId>>,
}

impl StaticPrivileges {
    pub fn new(sudo_users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            sudo_users: sudo_users.into_iter().collect(),
            chat_admins: DashMap::new(),
        }
    }

    pub fn add_admin(&self, chat: ChatId, user: UserId) {
        self.chat_admins.entry(chat).or_default().insert(user);
    }

    pub fn remove_admin(&self, chat: ChatId, user: UserId) -> bool {
        self.chat_admins
            .get(&chat)
            .is_some_and(|admins| admins.remove(&user).is_some())
    }

    pub fn is_sudo(&self, user: UserId) -> bool {
        self.sudo_users.contains(&user)
    }
}

#[async_trait]
impl PrivilegeCheck for StaticPrivileges {
    async fn is_privileged(&self, chat: ChatId, user: UserId) -> bool {
        self.is_sudo(user)
            || self
                .chat_admins
                .get(&chat)
                .is_some_and(|admins| admins.contains(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sudo_is_privileged_everywhere() {
        let privileges = StaticPrivileges::new([UserId(1)]);
        assert!(privileges.is_privileged(ChatId(10), UserId(1)).await);
        assert!(privileges.is_privileged(ChatId(20), UserId(1)).await);
        assert!(!privileges.is_privileged(ChatId(10), UserId(2)).await);
    }

    #[tokio::test]
    async fn test_chat_admin_is_scoped() {
        let privileges = StaticPrivileges::default();
        privileges.add_admin(ChatId(10), UserId(5));

        assert!(privileges.is_privileged(ChatId(10), UserId(5)).await);
        assert!(!privileges.is_privileged(ChatId(11), UserId(5)).await);
        assert!(privileges.remove_admin(ChatId(10), UserId(5)));
        assert!(!privileges.is_privileged(ChatId(10), UserId(5)).await);
    }
}
