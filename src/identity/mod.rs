//! Identity lookup seam.
//!
//! The user directory lives in the surrounding platform; the delivery
//! orchestrator only needs to resolve a user id to a contact record to
//! address the email channel and check verification.

use async_trait::async_trait;
use dashmap::DashMap;

/// Contact details for a recipient.
#[derive(Debug, Clone)]
pub struct ContactRecord {
    pub user_id: String,
    pub email: String,
    pub email_verified: bool,
}

/// Resolves a user id to a contact record. `None` means the user is unknown
/// to the platform; delivery must degrade silently in that case.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_contact(&self, user_id: &str) -> Option<ContactRecord>;
}

/// In-memory directory used by tests and the memory store profile.
pub struct MemoryUserDirectory {
    contacts: DashMap<String, ContactRecord>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            contacts: DashMap::new(),
        }
    }

    pub fn insert(&self, contact: ContactRecord) {
        self.contacts.insert(contact.user_id.clone(), contact);
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_contact(&self, user_id: &str) -> Option<ContactRecord> {
        self.contacts.get(user_id).map(|c| c.value().clone())
    }
}
