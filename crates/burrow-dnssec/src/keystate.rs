//! RFC 5011 trust anchor rollover tracking.
//!
//! The keeper consumes the keyset observed at each active refresh of the
//! anchored zone (a DNSKEY query of the root, in practice) and moves every
//! known key through the RFC 5011 lifecycle. Only keys in `Valid` or
//! `Missing` are published as usable anchors.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, info};

/// Add/remove hold-down interval, 30 days per RFC 5011.
pub const HOLD_DOWN_SECS: u64 = 30 * 24 * 3600;

/// Lifecycle state of one tracked key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Never seen before this refresh.
    Start,
    /// Seen, waiting out the add hold-down.
    AddPend,
    /// A usable trust anchor.
    Valid,
    /// Usable, but absent from the latest keyset.
    Missing,
    /// Revoke bit seen; waiting out the remove hold-down.
    Revoked,
    /// Hold-down elapsed after revocation; key is dead.
    Removed,
}

/// One key as seen in a refresh response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedKey {
    /// DNSKEY rdata, used as the key's identity.
    pub rdata: Bytes,
    /// Whether the REVOKE flag bit was set.
    pub revoked: bool,
}

#[derive(Debug, Clone)]
struct TrackedKey {
    state: KeyState,
    added_at: u64,
    hold_down_until: u64,
}

/// Tracks the RFC 5011 state of every key ever observed for one zone.
#[derive(Debug, Default)]
pub struct AnchorKeeper {
    keys: HashMap<Bytes, TrackedKey>,
}

impl AnchorKeeper {
    /// Creates an empty keeper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one observed keyset, advancing every tracked key.
    ///
    /// `now` is seconds since the epoch. Keys absent from `observed` that
    /// were still pending are purged; valid ones go to `Missing` and come
    /// back when they reappear.
    pub fn observe(&mut self, now: u64, observed: &[ObservedKey]) {
        // Phase 1: advance keys present in the refresh.
        for key in observed {
            let entry = self.keys.entry(key.rdata.clone()).or_insert(TrackedKey {
                state: KeyState::Start,
                added_at: now,
                hold_down_until: 0,
            });

            if key.revoked {
                match entry.state {
                    KeyState::Valid | KeyState::Missing => {
                        info!("trust anchor key revoked, starting remove hold-down");
                        entry.state = KeyState::Revoked;
                        entry.hold_down_until = now + HOLD_DOWN_SECS;
                    }
                    KeyState::Revoked if now >= entry.hold_down_until => {
                        entry.state = KeyState::Removed;
                    }
                    _ => {}
                }
                continue;
            }

            match entry.state {
                KeyState::Start => {
                    debug!("new trust anchor key, starting add hold-down");
                    entry.state = KeyState::AddPend;
                    entry.added_at = now;
                    entry.hold_down_until = now + HOLD_DOWN_SECS;
                }
                KeyState::AddPend if now >= entry.hold_down_until => {
                    info!("trust anchor key passed add hold-down, now valid");
                    entry.state = KeyState::Valid;
                }
                KeyState::Missing => {
                    debug!("missing trust anchor key reappeared");
                    entry.state = KeyState::Valid;
                }
                KeyState::Revoked if now >= entry.hold_down_until => {
                    entry.state = KeyState::Removed;
                }
                _ => {}
            }
        }

        // Phase 2: handle keys absent from the refresh.
        let seen: Vec<&Bytes> = observed.iter().map(|k| &k.rdata).collect();
        self.keys.retain(|rdata, entry| {
            if seen.contains(&rdata) {
                return true;
            }
            match entry.state {
                // A key that vanished before its add hold-down never
                // becomes trusted.
                KeyState::Start | KeyState::AddPend => {
                    debug!("pending trust anchor key vanished, purging");
                    false
                }
                KeyState::Valid => {
                    entry.state = KeyState::Missing;
                    entry.hold_down_until = now + HOLD_DOWN_SECS;
                    true
                }
                KeyState::Revoked if now >= entry.hold_down_until => {
                    entry.state = KeyState::Removed;
                    true
                }
                _ => true,
            }
        });
    }

    /// State of a key, if it is tracked.
    pub fn state_of(&self, rdata: &Bytes) -> Option<KeyState> {
        self.keys.get(rdata).map(|k| k.state)
    }

    /// Rdatas of the keys currently publishable as trust anchors.
    pub fn active(&self) -> Vec<Bytes> {
        self.keys
            .iter()
            .filter(|(_, k)| matches!(k.state, KeyState::Valid | KeyState::Missing))
            .map(|(rdata, _)| rdata.clone())
            .collect()
    }

    /// Number of tracked keys in any state.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> ObservedKey {
        ObservedKey {
            rdata: Bytes::copy_from_slice(&[1, 0, 3, 8, tag]),
            revoked: false,
        }
    }

    fn revoked(tag: u8) -> ObservedKey {
        ObservedKey {
            revoked: true,
            ..key(tag)
        }
    }

    #[test]
    fn add_hold_down_then_valid() {
        let mut keeper = AnchorKeeper::new();
        let k = key(1);

        keeper.observe(1000, &[k.clone()]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::AddPend));
        assert!(keeper.active().is_empty());

        // Still pending before the hold-down elapses.
        keeper.observe(1000 + HOLD_DOWN_SECS - 1, &[k.clone()]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::AddPend));

        keeper.observe(1000 + HOLD_DOWN_SECS, &[k.clone()]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Valid));
        assert_eq!(keeper.active(), vec![k.rdata]);
    }

    #[test]
    fn valid_key_goes_missing_and_returns() {
        let mut keeper = AnchorKeeper::new();
        let k = key(1);
        keeper.observe(0, &[k.clone()]);
        keeper.observe(HOLD_DOWN_SECS, &[k.clone()]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Valid));

        // Absent from the next refresh: missing but still active.
        keeper.observe(HOLD_DOWN_SECS + 100, &[]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Missing));
        assert_eq!(keeper.active().len(), 1);

        keeper.observe(HOLD_DOWN_SECS + 200, &[k.clone()]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Valid));
    }

    #[test]
    fn pending_key_vanishing_is_purged() {
        let mut keeper = AnchorKeeper::new();
        let k = key(1);
        keeper.observe(0, &[k.clone()]);
        keeper.observe(100, &[]);
        assert_eq!(keeper.state_of(&k.rdata), None);
        assert!(keeper.is_empty());
    }

    #[test]
    fn revoke_then_removed() {
        let mut keeper = AnchorKeeper::new();
        let k = key(1);
        keeper.observe(0, &[k.clone()]);
        keeper.observe(HOLD_DOWN_SECS, &[k.clone()]);

        let t_revoke = HOLD_DOWN_SECS + 10;
        keeper.observe(t_revoke, &[revoked(1)]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Revoked));
        assert!(keeper.active().is_empty());

        keeper.observe(t_revoke + HOLD_DOWN_SECS, &[revoked(1)]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Removed));
        assert!(keeper.active().is_empty());
    }

    #[test]
    fn missing_key_can_be_revoked() {
        let mut keeper = AnchorKeeper::new();
        let k = key(1);
        keeper.observe(0, &[k.clone()]);
        keeper.observe(HOLD_DOWN_SECS, &[k.clone()]);
        keeper.observe(HOLD_DOWN_SECS + 10, &[]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Missing));

        keeper.observe(HOLD_DOWN_SECS + 20, &[revoked(1)]);
        assert_eq!(keeper.state_of(&k.rdata), Some(KeyState::Revoked));
    }

    #[test]
    fn two_keys_roll_over() {
        let mut keeper = AnchorKeeper::new();
        let old = key(1);
        let new = key(2);

        keeper.observe(0, &[old.clone()]);
        keeper.observe(HOLD_DOWN_SECS, &[old.clone(), new.clone()]);
        assert_eq!(keeper.state_of(&old.rdata), Some(KeyState::Valid));
        assert_eq!(keeper.state_of(&new.rdata), Some(KeyState::AddPend));

        keeper.observe(2 * HOLD_DOWN_SECS, &[old.clone(), new.clone()]);
        assert_eq!(keeper.state_of(&new.rdata), Some(KeyState::Valid));
        assert_eq!(keeper.active().len(), 2);

        keeper.observe(2 * HOLD_DOWN_SECS + 10, &[revoked(1), new.clone()]);
        assert_eq!(keeper.state_of(&old.rdata), Some(KeyState::Revoked));
        assert_eq!(keeper.active(), vec![new.rdata]);
    }
}
