//! Conflict-free merge of pulled and pushed records.
//!
//! A [`RecordSet`] holds at most one record per identity. It is fed by two
//! independent producers:
//!
//! - **push**: socket deltas, applied immediately via [`RecordSet::upsert`]
//!   or [`RecordSet::remove`];
//! - **pull**: a REST snapshot, bracketed by [`RecordSet::begin_pull`] and
//!   [`RecordSet::complete_pull`].
//!
//! No ordering is assumed between a pull completing and a push arriving.
//! The rules that make the outcome independent of that race:
//!
//! 1. Two versions of one record are always combined with [`Merge::merge`],
//!    which each record type defines commutatively (read flags only ever
//!    turn on, the later edit wins). Pushed and pulled versions go through
//!    the same merge, so neither producer overrides the other wholesale.
//! 2. A record pushed while a pull is in flight survives an authoritative
//!    snapshot that does not list it yet.
//! 3. Removed identities are tombstoned; a snapshot taken before the
//!    removal cannot bring them back. An authoritative snapshot that no
//!    longer lists the identity retires its tombstone.
//! 4. Every pull carries a generation. [`RecordSet::clear`] and a newer
//!    `begin_pull` invalidate older tickets, so a late response for an
//!    abandoned pull is discarded.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

/// A record with a stable identity.
pub trait Keyed {
    type Key: Clone + Eq + Hash + Debug;

    fn key(&self) -> Self::Key;
}

/// How two versions of the same record combine.
pub trait Merge: Keyed + Sized {
    /// Combine the held version with an incoming one. Must not depend on
    /// which of the two arrived first when both are server versions.
    fn merge(existing: &Self, incoming: Self) -> Self;
}

/// Whether a pull returns the complete set or a subset of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullScope {
    /// The response is the whole collection; absent records are dropped.
    Authoritative,
    /// The response is a filtered or paginated subset; nothing is dropped.
    Partial,
}

/// Proof that a pull was started, checked again on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullTicket {
    generation: u64,
}

#[derive(Debug)]
pub struct RecordSet<R: Merge> {
    records: HashMap<R::Key, R>,
    tombstones: HashSet<R::Key>,
    generation: u64,
    in_flight: Option<u64>,
    pushed_during_pull: HashSet<R::Key>,
}

impl<R: Merge> Default for RecordSet<R> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            tombstones: HashSet::new(),
            generation: 0,
            in_flight: None,
            pushed_during_pull: HashSet::new(),
        }
    }
}

impl<R: Merge> RecordSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.records.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &R> {
        self.records.values()
    }

    pub fn is_pulling(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Apply a pushed record. Returns `false` for a tombstoned identity.
    pub fn upsert(&mut self, record: R) -> bool {
        let key = record.key();
        if self.tombstones.contains(&key) {
            tracing::debug!(?key, "Ignoring update for removed record");
            return false;
        }
        if self.in_flight.is_some() {
            self.pushed_during_pull.insert(key.clone());
        }
        self.merge_in(key, record);
        true
    }

    /// Remove a record and tombstone its identity.
    pub fn remove(&mut self, key: &R::Key) -> Option<R> {
        self.tombstones.insert(key.clone());
        if self.in_flight.is_some() {
            self.pushed_during_pull.insert(key.clone());
        }
        self.records.remove(key)
    }

    /// Change a held record in place (local, optimistic edits).
    pub fn update<F: FnOnce(&mut R)>(&mut self, key: &R::Key, f: F) -> bool {
        match self.records.get_mut(key) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Start a pull, superseding any pull already in flight.
    pub fn begin_pull(&mut self) -> PullTicket {
        self.generation += 1;
        self.in_flight = Some(self.generation);
        self.pushed_during_pull.clear();
        PullTicket {
            generation: self.generation,
        }
    }

    /// Whether `ticket` belongs to the pull currently in flight.
    pub fn is_current(&self, ticket: PullTicket) -> bool {
        self.in_flight == Some(ticket.generation)
    }

    /// Merge a pulled snapshot. Returns `false` (and changes nothing) when
    /// the ticket is stale.
    pub fn complete_pull(&mut self, ticket: PullTicket, snapshot: Vec<R>, scope: PullScope) -> bool {
        if !self.is_current(ticket) {
            tracing::debug!(generation = ticket.generation, "Discarding stale pull response");
            return false;
        }
        self.in_flight = None;
        let pushed = std::mem::take(&mut self.pushed_during_pull);

        let mut seen = HashSet::with_capacity(snapshot.len());
        for record in snapshot {
            let key = record.key();
            seen.insert(key.clone());
            if self.tombstones.contains(&key) {
                continue;
            }
            self.merge_in(key, record);
        }

        if scope == PullScope::Authoritative {
            self.records
                .retain(|key, _| seen.contains(key) || pushed.contains(key));
            self.tombstones.retain(|key| seen.contains(key));
        }
        true
    }

    /// End a failed pull without touching the records. Returns `false`
    /// when the ticket is stale.
    pub fn abandon_pull(&mut self, ticket: PullTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.in_flight = None;
        self.pushed_during_pull.clear();
        true
    }

    /// Drop every record and invalidate any pull in flight.
    pub fn clear(&mut self) {
        self.records.clear();
        self.tombstones.clear();
        self.pushed_during_pull.clear();
        self.generation += 1;
        self.in_flight = None;
    }

    fn merge_in(&mut self, key: R::Key, incoming: R) {
        let merged = match self.records.get(&key) {
            Some(existing) => R::merge(existing, incoming),
            None => incoming,
        };
        self.records.insert(key, merged);
    }
}
