use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::AuthError;
use crate::persistence::{decode_row, link_key, link_prefix, load_row, owner_key, save_row};
use crate::store::{Clock, KvStore};
use crate::types::{AccountLink, Chain, DerivedFrom, ProfileId};

/// Account links keyed by profile, plus an owner index keyed by address.
///
/// The owner index is the source of truth for "who holds this address"; it
/// is claimed with `put_if_absent` before the link row is written, so two
/// profiles racing for one address cannot both win.
pub struct LinkRegistry {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl LinkRegistry {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn link(
        &self,
        profile_id: &str,
        chain: Chain,
        address: &str,
        is_primary: bool,
        derived_from: Option<DerivedFrom>,
    ) -> Result<AccountLink, AuthError> {
        let address = address.trim();
        if profile_id.is_empty() || address.is_empty() {
            return Err(AuthError::BadRequest("profile and address required"));
        }

        let owner = owner_key(chain, address);
        if let Some(existing) = self
            .store
            .put_if_absent(&owner, profile_id.as_bytes().to_vec())?
        {
            if existing.as_slice() != profile_id.as_bytes() {
                warn!(target: "links", chain = %chain, "address already owned by another profile");
                return Err(AuthError::AddressAlreadyLinked);
            }
            let key = link_key(profile_id, chain, address);
            if let Some(row) = load_row::<AccountLink>(self.store.as_ref(), &key)? {
                return Ok(row);
            }
            // owner claimed but link row never written; fall through and write it
        }

        let row = AccountLink {
            profile_id: profile_id.to_string(),
            chain,
            address: address.to_string(),
            is_primary,
            derived_from_chain: derived_from.as_ref().map(|d| d.chain),
            derived_from_address: derived_from.map(|d| d.address),
            linked_at: self.clock.now(),
        };
        save_row(
            self.store.as_ref(),
            &link_key(profile_id, chain, address),
            &row,
        )?;

        info!(target: "links", profile_id, chain = %chain, is_primary, "address linked");
        Ok(row)
    }

    pub fn owner_of(&self, chain: Chain, address: &str) -> Result<Option<ProfileId>, AuthError> {
        let key = owner_key(chain, address);
        match self.store.get(&key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| AuthError::CorruptRecord {
                    key,
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    pub fn links_for_profile(&self, profile_id: &str) -> Result<Vec<AccountLink>, AuthError> {
        self.store
            .scan_prefix(&link_prefix(profile_id))?
            .into_iter()
            .map(|(key, bytes)| decode_row(&key, &bytes))
            .collect()
    }

    pub fn primary_link(&self, profile_id: &str) -> Result<Option<AccountLink>, AuthError> {
        Ok(self
            .links_for_profile(profile_id)?
            .into_iter()
            .find(|l| l.is_primary))
    }
}
