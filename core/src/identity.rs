//! Participant identity: principal resolution and partner display lookup
//! across the coach / client / admin identity partitions
use crate::error::{Result, SyncError};
use crate::types::{AccountRole, ParticipantType, PartnerIdentity};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// One identity partition (the coach, client or admin profile table)
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn participant_type(&self) -> ParticipantType;

    /// Map an authenticated account id to this partition's participant id
    async fn resolve_account(&self, account_id: &str) -> Result<Option<String>>;

    /// Display identity for a participant id, if this partition knows it
    async fn lookup(&self, participant_id: &str) -> Result<Option<PartnerIdentity>>;
}

/// Ordered collection of identity partitions.
///
/// Partner lookups probe coach first, then client, then admin; coach display
/// names are the richest, so they win ties.
#[derive(Clone)]
pub struct IdentityDirectory {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl IdentityDirectory {
    pub fn new(
        coach: Arc<dyn IdentityProvider>,
        client: Arc<dyn IdentityProvider>,
        admin: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            providers: vec![coach, client, admin],
        }
    }

    fn provider_for(&self, participant_type: ParticipantType) -> Option<&Arc<dyn IdentityProvider>> {
        self.providers
            .iter()
            .find(|p| p.participant_type() == participant_type)
    }

    /// Resolve the authenticated account to its durable participant id.
    ///
    /// Administrative roles live in the admin partition; everyone else in the
    /// partition matching their declared role. The returned id is the only
    /// value ever used as a message's sender or receiver.
    pub async fn resolve_principal(&self, account_id: &str, role: AccountRole) -> Result<String> {
        let target = if role.is_administrative() {
            ParticipantType::Admin
        } else if role == AccountRole::Coach {
            ParticipantType::Coach
        } else {
            ParticipantType::Client
        };

        let provider = self.provider_for(target).ok_or(SyncError::ProfileNotFound)?;
        match provider.resolve_account(account_id).await? {
            Some(participant_id) => Ok(participant_id),
            None => Err(SyncError::ProfileNotFound),
        }
    }

    /// Display identity for a partner, probing partitions in order; falls
    /// back to a generic placeholder when none match. A failing partition is
    /// logged and treated as a miss so one broken table cannot sink a whole
    /// aggregation pass.
    pub async fn lookup_partner(&self, participant_id: &str) -> PartnerIdentity {
        for provider in &self.providers {
            match provider.lookup(participant_id).await {
                Ok(Some(identity)) => return identity,
                Ok(None) => {}
                Err(e) => warn!(
                    "identity partition {:?} lookup failed for {}: {}",
                    provider.participant_type(),
                    participant_id,
                    e
                ),
            }
        }
        PartnerIdentity::unknown()
    }
}
