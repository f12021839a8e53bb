use tracing::info;

use crate::limits::MAX_HOSTS;
use crate::model::*;

use super::{Engine, EngineError, ValidationRule};

impl Engine {
    /// Create or replace a host profile. The owner of an existing host is fixed.
    pub async fn upsert_host(
        &self,
        actor: Actor,
        profile: HostProfile,
    ) -> Result<HostProfile, EngineError> {
        if profile.nightly_rate == 0 {
            return Err(ValidationRule::InvalidRate.into());
        }
        if profile.max_guests == 0 {
            return Err(ValidationRule::InvalidMaxGuests.into());
        }
        if !actor.is_system() && !(actor.role == Role::Host && actor.user_id == profile.owner_id) {
            return Err(EngineError::Forbidden("only the listing owner can edit a host"));
        }

        let _gate = self.enter_gate().await?;
        let created = {
            let catalog = self.lock_catalog().await;
            if self.hosts.contains_key(&profile.id) {
                false
            } else {
                if self.hosts.len() >= MAX_HOSTS {
                    return Err(ValidationRule::TooManyHosts.into());
                }
                self.persist_new_host(catalog, profile.clone()).await?;
                true
            }
        };

        if !created {
            let guard = self.lock_host(profile.id).await?;
            if guard.profile.owner_id != profile.owner_id {
                return Err(EngineError::Forbidden("host owner cannot change"));
            }
            let event = Event::HostUpserted {
                profile: profile.clone(),
            };
            drop(self.persist_and_apply(guard, event).await?);
        }

        info!(
            host_id = %profile.id,
            owner_id = %profile.owner_id,
            nightly_rate = profile.nightly_rate,
            max_guests = profile.max_guests,
            active = profile.active,
            created,
            "host upserted"
        );
        Ok(profile)
    }

    pub async fn get_host(&self, host_id: ulid::Ulid) -> Result<HostProfile, EngineError> {
        let guard = self.read_host(host_id).await?;
        Ok(guard.profile.clone())
    }
}
