// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The [`Catalog`] structure and its [`ZoneEntry`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{info, warn};
use slab::Slab;

use crate::class::Class;
use crate::name::Name;
use crate::rr::{Record, Soa};
use crate::serial;
use crate::xfr::delta::{Delta, DeltaLog, DeltaSpan};

use super::memory::MemoryZone;
use super::zone::{Zone, ZoneId, ZoneKind};
use super::Error;

////////////////////////////////////////////////////////////////////////
// CATALOG                                                            //
////////////////////////////////////////////////////////////////////////

/// The collection of zones known to the server.
///
/// A [catalog][RFC 1035 § 6.1.2] maps each zone's origin and class to a
/// [`ZoneEntry`], which holds the zone's current data (if loaded) along
/// with the per-zone state that transfers need: the generation counter,
/// the [`DeltaLog`], lifecycle flags, and the registry of active push
/// sessions.
///
/// [RFC 1035 § 6.1.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-6.1.2
#[derive(Debug, Default)]
pub struct Catalog {
    zones: RwLock<HashMap<(Name, Class), Arc<ZoneEntry>>>,
    next_id: AtomicUsize,
}

impl Catalog {
    /// Creates a new, initially empty `Catalog`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry for a zone with no data loaded, replacing and
    /// returning any existing entry with the same origin and class.
    pub fn insert(
        &self,
        origin: Name,
        class: Class,
        kind: ZoneKind,
        max_log_len: usize,
    ) -> (Arc<ZoneEntry>, Option<Arc<ZoneEntry>>) {
        let entry = Arc::new(ZoneEntry::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            origin.clone(),
            class,
            kind,
            max_log_len,
        ));
        let old = self
            .zones
            .write()
            .unwrap()
            .insert((origin, class), entry.clone());
        if let Some(ref old) = old {
            old.abort_sessions();
        }
        (entry, old)
    }

    /// Finds the entry for a zone by its exact origin and class.
    pub fn get(&self, origin: &Name, class: Class) -> Option<Arc<ZoneEntry>> {
        self.zones
            .read()
            .unwrap()
            .get(&(origin.clone(), class))
            .cloned()
    }

    /// Removes a zone, aborting its active push sessions.
    pub fn remove(&self, origin: &Name, class: Class) -> Option<Arc<ZoneEntry>> {
        let removed = self
            .zones
            .write()
            .unwrap()
            .remove(&(origin.clone(), class));
        if let Some(ref entry) = removed {
            entry.abort_sessions();
        }
        removed
    }

    /// Returns every entry in the catalog.
    pub fn entries(&self) -> Vec<Arc<ZoneEntry>> {
        self.zones.read().unwrap().values().cloned().collect()
    }
}

////////////////////////////////////////////////////////////////////////
// ZONE ENTRIES                                                       //
////////////////////////////////////////////////////////////////////////

/// A zone in the [`Catalog`].
#[derive(Debug)]
pub struct ZoneEntry {
    id: ZoneId,
    origin: Name,
    class: Class,
    kind: ZoneKind,
    generation: AtomicU64,
    zone: RwLock<Option<Arc<MemoryZone>>>,
    delta_log: Mutex<DeltaLog>,
    flags: Mutex<Flags>,
    sessions: Mutex<Slab<Arc<AtomicBool>>>,
}

/// The lifecycle flags of a zone.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Flags {
    pub transfer_in_progress: bool,
    pub transfer_needed: bool,
    pub notify_pending: bool,
}

impl ZoneEntry {
    fn new(id: ZoneId, origin: Name, class: Class, kind: ZoneKind, max_log_len: usize) -> Self {
        Self {
            id,
            origin,
            class,
            kind,
            generation: AtomicU64::new(0),
            zone: RwLock::new(None),
            delta_log: Mutex::new(DeltaLog::new(max_log_len)),
            flags: Mutex::new(Flags::default()),
            sessions: Mutex::new(Slab::new()),
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    pub fn origin(&self) -> &Name {
        &self.origin
    }

    pub fn class(&self) -> Class {
        self.class
    }

    pub fn kind(&self) -> ZoneKind {
        self.kind
    }

    /// Returns the live generation of the zone. Every commit, delta,
    /// and reload moves to a new generation; records and sessions of an
    /// older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Returns the current version of the zone's data, if loaded.
    pub fn snapshot(&self) -> Option<Arc<MemoryZone>> {
        self.zone.read().unwrap().clone()
    }

    /// Returns the zone's current serial.
    pub fn current_serial(&self) -> Option<u32> {
        self.zone.read().unwrap().as_ref().map(|z| z.serial())
    }

    /// Returns the zone's current SOA.
    pub fn soa_of(&self) -> Option<Soa> {
        self.zone.read().unwrap().as_ref().map(|z| z.soa().clone())
    }

    /// Publishes a complete new image of the zone. The new serial must
    /// be newer than the current one. The [`DeltaLog`] is cleared, since
    /// the history leading to the new image is unknown.
    pub fn commit_zone_image(&self, records: Vec<Record>) -> Result<u32, Error> {
        self.replace_image(records, true)
    }

    /// Publishes a new image of the zone without checking its serial.
    /// This is the administrative reset (and the initial load).
    pub fn reset_zone_image(&self, records: Vec<Record>) -> Result<u32, Error> {
        self.replace_image(records, false)
    }

    fn replace_image(&self, records: Vec<Record>, check_serial: bool) -> Result<u32, Error> {
        let mut zone = self.zone.write().unwrap();
        let generation = self.generation() + 1;
        let new = MemoryZone::build(self.id, self.origin.clone(), self.class, generation, records)?;
        if let (true, Some(current)) = (check_serial, zone.as_ref()) {
            if !serial::is_newer(new.serial(), current.serial()) {
                return Err(Error::SerialNotNewer {
                    current: current.serial(),
                    new: new.serial(),
                });
            }
        }
        let serial = new.serial();
        *zone = Some(Arc::new(new));
        self.generation.store(generation, Ordering::Release);
        self.delta_log.lock().unwrap().clear();
        self.abort_sessions();
        info!(
            "zone {}/{} now at serial {} (generation {})",
            self.origin, self.class, serial, generation
        );
        Ok(serial)
    }

    /// Applies a delta to the zone and appends it to the [`DeltaLog`].
    pub fn append_delta(&self, delta: Delta) -> Result<u32, Error> {
        let mut zone = self.zone.write().unwrap();
        let current = zone.as_ref().ok_or(Error::NoZoneData)?;
        if !delta.is_collapsed() && !serial::is_newer(delta.to_serial, delta.from_serial) {
            return Err(Error::SerialNotNewer {
                current: delta.from_serial,
                new: delta.to_serial,
            });
        }
        let generation = self.generation() + 1;
        let new = current.apply(&delta, generation)?;
        let serial = new.serial();
        *zone = Some(Arc::new(new));
        self.generation.store(generation, Ordering::Release);

        let mut log = self.delta_log.lock().unwrap();
        if log.last_serial().map_or(false, |s| s != delta.from_serial) {
            warn!(
                "delta log of zone {}/{} is discontiguous; discarding it",
                self.origin, self.class
            );
            log.clear();
        }
        log.append(delta)?;
        drop(log);

        self.abort_sessions();
        Ok(serial)
    }

    /// Seeds the [`DeltaLog`] without touching the zone data (for
    /// instance, from an IXFR log file read at startup).
    pub fn seed_delta_log(&self, deltas: impl IntoIterator<Item = Delta>) -> Result<(), Error> {
        let mut log = self.delta_log.lock().unwrap();
        for delta in deltas {
            log.append(delta)?;
        }
        Ok(())
    }

    /// Returns the number of deltas in the [`DeltaLog`].
    pub fn delta_log_len(&self) -> usize {
        self.delta_log.lock().unwrap().len()
    }

    /// Looks up the deltas that bring a peer at `peer_serial` up to the
    /// current serial.
    pub fn delta_span(&self, peer_serial: u32) -> Option<DeltaSpan> {
        let current = self.current_serial()?;
        self.delta_log.lock().unwrap().span(peer_serial, current)
    }

    ////////////////////////////////////////////////////////////////////
    // LIFECYCLE FLAGS                                                //
    ////////////////////////////////////////////////////////////////////

    pub fn flags(&self) -> Flags {
        *self.flags.lock().unwrap()
    }

    pub fn set_transfer_needed(&self, value: bool) {
        self.flags.lock().unwrap().transfer_needed = value;
    }

    pub fn set_notify_pending(&self, value: bool) {
        self.flags.lock().unwrap().notify_pending = value;
    }

    /// Marks a pull as in progress. Returns an error if one already is;
    /// a zone has at most one outstanding pull at a time. The flag is
    /// cleared when the returned guard is dropped.
    pub fn begin_pull(&self) -> Result<PullGuard, Error> {
        let mut flags = self.flags.lock().unwrap();
        if flags.transfer_in_progress {
            Err(Error::TransferInProgress)
        } else {
            flags.transfer_in_progress = true;
            flags.transfer_needed = false;
            Ok(PullGuard { entry: self })
        }
    }

    ////////////////////////////////////////////////////////////////////
    // PUSH SESSION REGISTRY                                          //
    ////////////////////////////////////////////////////////////////////

    /// Registers an active push session. The session should poll
    /// [`SessionGuard::is_aborted`] each time it resumes.
    pub fn register_session(self: &Arc<Self>) -> SessionGuard {
        let aborted = Arc::new(AtomicBool::new(false));
        let key = self.sessions.lock().unwrap().insert(aborted.clone());
        SessionGuard {
            entry: self.clone(),
            key,
            aborted,
        }
    }

    /// Returns the number of active push sessions.
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Signals every active push session of the zone to abort.
    pub fn abort_sessions(&self) {
        let sessions = self.sessions.lock().unwrap();
        if !sessions.is_empty() {
            info!(
                "aborting {} push session(s) of zone {}/{}",
                sessions.len(),
                self.origin,
                self.class
            );
        }
        for (_, aborted) in sessions.iter() {
            aborted.store(true, Ordering::Release);
        }
    }
}

/// Clears a zone's transfer-in-progress flag when dropped. See
/// [`ZoneEntry::begin_pull`].
#[derive(Debug)]
pub struct PullGuard<'a> {
    entry: &'a ZoneEntry,
}

impl Drop for PullGuard<'_> {
    fn drop(&mut self) {
        self.entry.flags.lock().unwrap().transfer_in_progress = false;
    }
}

/// Unregisters a push session when dropped. See
/// [`ZoneEntry::register_session`].
#[derive(Debug)]
pub struct SessionGuard {
    entry: Arc<ZoneEntry>,
    key: usize,
    aborted: Arc<AtomicBool>,
}

impl SessionGuard {
    /// Returns whether the session has been told to abort.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn entry(&self) -> &Arc<ZoneEntry> {
        &self.entry
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.entry.sessions.lock().unwrap().remove(self.key);
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
