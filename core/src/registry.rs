//! Entrant registry: membership queries and exclusive pool moves.
//!
//! All pool mutation on an [`EventRecord`] goes through this module. Each
//! operation checks the entrant's current membership against the snapshot it
//! is applied to, so a move can never leave an entrant in two pools.

use crate::event::{EventRecord, Membership, Pool};
use crate::ids::EntrantId;
use thiserror::Error;

/// Rejected pool move.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The entrant is not (only) in the source pool.
    #[error("Entrant {entrant_id} is not a member of {expected} (currently {actual})")]
    NotAMember {
        /// The entrant being moved
        entrant_id: EntrantId,
        /// The pool the move expected the entrant in
        expected: Pool,
        /// Where the entrant actually is
        actual: Membership,
    },

    /// The entrant is already in the destination pool.
    #[error("Entrant {entrant_id} is already a member of {pool}")]
    AlreadyMember {
        /// The entrant being moved or admitted
        entrant_id: EntrantId,
        /// The pool the entrant already occupies
        pool: Pool,
    },
}

impl EventRecord {
    /// Where `entrant_id` currently sits. Read-only.
    #[must_use]
    pub fn membership_of(&self, entrant_id: &EntrantId) -> Membership {
        Pool::ALL
            .into_iter()
            .find(|pool| self.pool(*pool).contains(entrant_id))
            .map_or(Membership::None, Membership::from)
    }

    /// Add a brand-new entrant to the waiting pool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyMember`] if the entrant is in any pool.
    pub fn admit(&mut self, entrant_id: EntrantId) -> Result<(), RegistryError> {
        if let Some(pool) = self.membership_of(&entrant_id).pool() {
            return Err(RegistryError::AlreadyMember { entrant_id, pool });
        }
        self.waiting.insert(entrant_id);
        Ok(())
    }

    /// Move `entrant_id` from `from` to `to`.
    ///
    /// Succeeds only when the entrant is in `from` and in no other pool.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyMember`] if the entrant is already in `to`
    /// - [`RegistryError::NotAMember`] if the entrant is not in `from`, or is
    ///   also present in another pool
    pub fn move_entrant(
        &mut self,
        entrant_id: &EntrantId,
        from: Pool,
        to: Pool,
    ) -> Result<(), RegistryError> {
        if self.pool(to).contains(entrant_id) {
            return Err(RegistryError::AlreadyMember {
                entrant_id: entrant_id.clone(),
                pool: to,
            });
        }

        let occupied: Vec<Pool> = Pool::ALL
            .into_iter()
            .filter(|pool| self.pool(*pool).contains(entrant_id))
            .collect();
        if occupied != [from] {
            return Err(RegistryError::NotAMember {
                entrant_id: entrant_id.clone(),
                expected: from,
                actual: self.membership_of(entrant_id),
            });
        }

        self.pool_mut(from).remove(entrant_id);
        self.pool_mut(to).insert(entrant_id.clone());
        Ok(())
    }

    /// Move every entrant of `from` into `to`, returning how many moved.
    pub(crate) fn drain_into(&mut self, from: Pool, to: Pool) -> usize {
        let drained: Vec<EntrantId> = self.pool_mut(from).drain().collect();
        let moved = drained.len();
        self.pool_mut(to).extend(drained);
        moved
    }
}
