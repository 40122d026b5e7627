//! Claim/publish slot protocol shared by the hash table and the trie
//!
//! A slot is a single atomic word with three logical states:
//!
//! ```text
//! Empty (0) --[try_claim CAS]--> Claimed (1) --[publish]--> Populated(p) (p + 2)
//! ```
//!
//! Transitions never go backwards and `Populated` is terminal. Exactly one
//! thread wins the claim for a slot; every other thread either sees the
//! populated value or spins until the winner publishes it.
//!
//! # Liveness
//!
//! There is no timeout or cancellation on the winner's side. A thread that
//! receives a [`PendingSlot`] must publish it promptly: no I/O, no retries and
//! no fallible work between the claim and the publish. Waiters are bounded only
//! by the [`SpinPolicy`] stall timeout.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytemuck::Zeroable;
use crossbeam::utils::Backoff;

use crate::status::IndexError;

const EMPTY: u64 = 0;
const CLAIMED: u64 = 1;
const POPULATED_BASE: u64 = 2;

/// Opaque payload reference stored in a populated slot
///
/// Payloads are whatever the caller uses to find its data: an index into a
/// corpus arena, an input id, a trie level id. Values above [`Payload::MAX`]
/// collide with the slot state encoding and are rejected.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Payload(u64);

impl Payload {
    /// Largest representable payload value
    pub const MAX: u64 = u64::MAX - POPULATED_BASE;

    /// Create a payload, returning `None` above [`Payload::MAX`]
    #[inline]
    pub const fn new(value: u64) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Get the payload value
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }

    #[inline]
    const fn encode(self) -> u64 {
        self.0 + POPULATED_BASE
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.0)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never populated
    Empty,
    /// A thread won the claim and has not published yet
    Claimed,
    /// Holds a published payload
    Populated(Payload),
}

impl SlotState {
    #[inline]
    const fn from_raw(raw: u64) -> Self {
        match raw {
            EMPTY => SlotState::Empty,
            CLAIMED => SlotState::Claimed,
            _ => SlotState::Populated(Payload(raw - POPULATED_BASE)),
        }
    }

    /// Get the payload if the slot is populated
    #[inline]
    pub const fn payload(&self) -> Option<Payload> {
        match self {
            SlotState::Populated(payload) => Some(*payload),
            _ => None,
        }
    }
}

/// Atomic slot word
#[repr(transparent)]
pub struct AtomicSlot(AtomicU64);

// SAFETY: `AtomicU64` has the same representation as `u64` and zero decodes to
// `SlotState::Empty`.
unsafe impl Zeroable for AtomicSlot {}

impl AtomicSlot {
    /// Create an empty slot
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(EMPTY))
    }

    /// Load and decode the slot
    #[inline]
    pub fn load(&self, ordering: Ordering) -> SlotState {
        SlotState::from_raw(self.0.load(ordering))
    }

    /// Try to move the slot from `Empty` to `Claimed`
    ///
    /// On failure returns the state that was observed instead, which is never
    /// `Empty`.
    #[inline]
    pub fn try_claim(&self) -> Result<(), SlotState> {
        self.0
            .compare_exchange(EMPTY, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SlotState::from_raw)
    }

    /// Move the slot from `Empty` straight to `Populated(payload)`
    ///
    /// Used when the payload is ready before the race, so there is no claimed
    /// window for other threads to wait on. On failure returns the observed
    /// state.
    #[inline]
    pub(crate) fn try_populate(&self, payload: Payload) -> Result<(), SlotState> {
        self.0
            .compare_exchange(EMPTY, payload.encode(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(SlotState::from_raw)
    }

    /// Publish a payload into a slot owned by the caller
    ///
    /// The caller must hold the claim (or, for hash table payload fields, have
    /// committed the entry's key).
    #[inline]
    pub(crate) fn publish(&self, payload: Payload) {
        let previous = self.0.swap(payload.encode(), Ordering::Release);
        debug_assert!(
            previous == EMPTY || previous == CLAIMED,
            "slot published twice (previous state {:?})",
            SlotState::from_raw(previous)
        );
    }

    /// Spin until the slot is populated and return its payload
    pub fn wait_populated(&self, policy: &SpinPolicy) -> Result<Payload, IndexError> {
        let backoff = Backoff::new();
        let mut yielding_since: Option<Instant> = None;

        loop {
            if let SlotState::Populated(payload) = self.load(Ordering::Acquire) {
                return Ok(payload);
            }

            if backoff.is_completed() {
                if let Some(timeout) = policy.stall_timeout {
                    let waited = yielding_since.get_or_insert_with(Instant::now).elapsed();
                    if waited >= timeout {
                        tracing::warn!(?waited, "claimed slot was never published");
                        return Err(IndexError::ClaimStalled { waited });
                    }
                }
            }
            backoff.snooze();
        }
    }
}

impl Default for AtomicSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomicSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicSlot")
            .field(&self.load(Ordering::Relaxed))
            .finish()
    }
}

/// How long waiters spin on a claimed slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinPolicy {
    /// Give up with `IndexError::ClaimStalled` after yielding this long
    ///
    /// `None` waits forever.
    pub stall_timeout: Option<Duration>,
}

impl SpinPolicy {
    /// Default stall timeout
    pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Wait forever for claimed slots
    pub const fn unbounded() -> Self {
        Self {
            stall_timeout: None,
        }
    }

    /// Set the stall timeout
    pub const fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = Some(timeout);
        self
    }
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self {
            stall_timeout: Some(Self::DEFAULT_STALL_TIMEOUT),
        }
    }
}

/// Slot claimed by the current thread, waiting for its payload
///
/// Every other caller for the same key spins until [`PendingSlot::publish`]
/// runs, so publish right away.
#[must_use = "other threads spin on this slot until it is published"]
pub struct PendingSlot<'a> {
    slot: &'a AtomicSlot,
    published: bool,
}

impl<'a> PendingSlot<'a> {
    #[inline]
    pub(crate) fn new(slot: &'a AtomicSlot) -> Self {
        Self {
            slot,
            published: false,
        }
    }

    /// Publish the payload, making it visible to every other caller
    #[inline]
    pub fn publish(mut self, payload: Payload) {
        self.slot.publish(payload);
        self.published = true;
    }
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if !self.published {
            tracing::error!("claimed slot dropped without publishing a payload");
            debug_assert!(
                std::thread::panicking(),
                "claimed slot dropped without publishing a payload"
            );
        }
    }
}

impl fmt::Debug for PendingSlot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSlot")
            .field("published", &self.published)
            .finish()
    }
}

/// Outcome of `fetch_or_claim`
#[must_use]
#[derive(Debug)]
pub enum Claim<'a> {
    /// The caller won the claim and must publish a payload
    New(PendingSlot<'a>),
    /// The key was already populated (possibly after waiting for its winner)
    Existing(Payload),
}

impl Claim<'_> {
    /// Check if the caller won the claim
    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, Claim::New(_))
    }

    /// Get the existing payload, if any
    #[inline]
    pub fn existing(&self) -> Option<Payload> {
        match self {
            Claim::New(_) => None,
            Claim::Existing(payload) => Some(*payload),
        }
    }

    /// Publish `payload` if the claim is new, and return the key's payload
    #[inline]
    pub fn or_publish(self, payload: Payload) -> Payload {
        self.or_publish_with(|| payload)
    }

    /// Publish the result of `f` if the claim is new, and return the key's payload
    ///
    /// `f` runs between claim and publish, so it must be short and infallible.
    #[inline]
    pub fn or_publish_with<F: FnOnce() -> Payload>(self, f: F) -> Payload {
        match self {
            Claim::New(pending) => {
                let payload = f();
                pending.publish(payload);
                payload
            }
            Claim::Existing(payload) => payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn payload(v: u64) -> Payload {
        Payload::new(v).unwrap()
    }

    #[test]
    fn test_payload_range() {
        assert_eq!(Payload::new(0).unwrap().get(), 0);
        assert_eq!(Payload::new(Payload::MAX).unwrap().get(), Payload::MAX);
        assert!(Payload::new(Payload::MAX + 1).is_none());
        assert!(Payload::new(u64::MAX).is_none());
    }

    #[test]
    fn test_slot_transitions() {
        let slot = AtomicSlot::new();
        assert_eq!(slot.load(Ordering::Acquire), SlotState::Empty);

        slot.try_claim().unwrap();
        assert_eq!(slot.load(Ordering::Acquire), SlotState::Claimed);
        assert_eq!(slot.try_claim(), Err(SlotState::Claimed));

        slot.publish(payload(0));
        assert_eq!(
            slot.load(Ordering::Acquire),
            SlotState::Populated(payload(0))
        );
        assert_eq!(slot.try_claim(), Err(SlotState::Populated(payload(0))));
    }

    #[test]
    fn test_try_populate_skips_claimed_state() {
        let slot = AtomicSlot::new();
        slot.try_populate(payload(4)).unwrap();
        assert_eq!(slot.load(Ordering::Acquire), SlotState::Populated(payload(4)));
        assert_eq!(
            slot.try_populate(payload(5)),
            Err(SlotState::Populated(payload(4)))
        );

        let claimed = AtomicSlot::new();
        claimed.try_claim().unwrap();
        assert_eq!(claimed.try_populate(payload(1)), Err(SlotState::Claimed));
    }

    #[test]
    fn test_slot_max_payload_round_trips() {
        let slot = AtomicSlot::new();
        slot.try_claim().unwrap();
        slot.publish(payload(Payload::MAX));
        assert_eq!(
            slot.load(Ordering::Acquire).payload(),
            Some(payload(Payload::MAX))
        );
    }

    #[test]
    fn test_wait_populated_returns_immediately_when_populated() {
        let slot = AtomicSlot::new();
        slot.try_claim().unwrap();
        slot.publish(payload(9));
        assert_eq!(
            slot.wait_populated(&SpinPolicy::default()).unwrap(),
            payload(9)
        );
    }

    #[test]
    fn test_wait_populated_sees_late_publish() {
        let slot = Arc::new(AtomicSlot::new());
        slot.try_claim().unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_populated(&SpinPolicy::unbounded()))
        };

        thread::sleep(Duration::from_millis(20));
        slot.publish(payload(77));
        assert_eq!(waiter.join().unwrap().unwrap(), payload(77));
    }

    #[test]
    fn test_wait_populated_stalls() {
        let slot = AtomicSlot::new();
        slot.try_claim().unwrap();

        let policy = SpinPolicy::unbounded().with_stall_timeout(Duration::from_millis(10));
        let err = slot.wait_populated(&policy).unwrap_err();
        assert!(matches!(err, IndexError::ClaimStalled { waited } if waited >= Duration::from_millis(10)));
    }

    #[test]
    fn test_claim_or_publish() {
        let slot = AtomicSlot::new();
        slot.try_claim().unwrap();

        let claim = Claim::New(PendingSlot::new(&slot));
        assert!(claim.is_new());
        assert_eq!(claim.existing(), None);
        assert_eq!(claim.or_publish(payload(5)), payload(5));
        assert_eq!(slot.load(Ordering::Acquire), SlotState::Populated(payload(5)));

        let claim = Claim::Existing(payload(5));
        assert!(!claim.is_new());
        assert_eq!(claim.or_publish_with(|| unreachable!()), payload(5));
    }
}
