//! Fixed-capacity slot table of the actors in one game instance

use crate::player::PlayerActor;
use log::debug;
use maze_shared::GAME_MAX_PLAYERS;
use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Slots {
    slots: [Option<Arc<PlayerActor>>; GAME_MAX_PLAYERS],
    used: usize,
}

impl Slots {
    fn lowest_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn get(&self, slot: u8) -> Option<&Arc<PlayerActor>> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<PlayerActor>> {
        self.slots.iter().flatten()
    }
}

/// Read-mostly registry. Ticks iterate under a shared lock; joins and
/// leaves start from an upgradable read and only upgrade once they know
/// they will change something.
#[derive(Debug, Default)]
pub struct PlayersRegistry {
    inner: RwLock<Slots>,
}

impl PlayersRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the actor built by `make` in the lowest free slot.
    /// Returns `None` when all slots are taken; `make` is not called then.
    pub fn add_with<F>(&self, make: F) -> Option<Arc<PlayerActor>>
    where
        F: FnOnce(u8) -> PlayerActor,
    {
        let guard = self.inner.upgradable_read();
        let slot = guard.lowest_free()?;

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        let actor = Arc::new(make(slot as u8));
        guard.slots[slot] = Some(Arc::clone(&actor));
        guard.used += 1;

        debug!("slot {} taken by {}, {} used", slot, actor.nick(), guard.used);
        Some(actor)
    }

    /// Frees `slot` if it still holds `actor`
    pub fn remove(&self, slot: u8, actor: &Arc<PlayerActor>) -> bool {
        let guard = self.inner.upgradable_read();
        match guard.get(slot) {
            Some(stored) => {
                debug_assert!(
                    Arc::ptr_eq(stored, actor),
                    "slot mismatch: slot {} holds {}, not {}",
                    slot,
                    stored.nick(),
                    actor.nick()
                );
                if !Arc::ptr_eq(stored, actor) {
                    return false;
                }
            }
            None => return false,
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard.slots[slot as usize] = None;
        guard.used -= 1;
        true
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.inner.read()
    }

    pub fn used_slots(&self) -> usize {
        self.inner.read().used
    }

    pub fn is_full(&self) -> bool {
        self.used_slots() == GAME_MAX_PLAYERS
    }

    /// Snapshot of the registered actors, for work that must not hold the lock
    pub fn actors(&self) -> Vec<Arc<PlayerActor>> {
        self.inner.read().iter().cloned().collect()
    }

    pub fn find<P>(&self, predicate: P) -> Option<Arc<PlayerActor>>
    where
        P: Fn(&PlayerActor) -> bool,
    {
        self.inner.read().iter().find(|a| predicate(a)).cloned()
    }

    /// Empties every slot, handing the actors back to the caller
    pub fn drain(&self) -> Vec<Arc<PlayerActor>> {
        let mut guard = self.inner.write();
        guard.used = 0;
        let drained = guard.slots.iter_mut().filter_map(Option::take).collect();
        drained
    }
}
