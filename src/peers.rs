//! Peer table
//!
//! Descriptors live in an arena addressed by [`PeerId`]. The id carries a
//! generation so a handle to a removed peer never resolves to the peer that
//! later reuses its slot.
//!
//! Lock order: callers may hold a descriptor's field locks while calling
//! into the table, so table methods never lock descriptor fields while the
//! table lock is held.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::CHALLENGE_LEN;
use crate::element::AthCaps;
use crate::fragment::Reassembler;
use crate::frame::MacAddr;
use crate::rates::{HtCapabilities, McsSet, RateSet};
use crate::security::RsnParams;
use crate::sequence::SequenceFilter;
use crate::{Dot11Error, Result};

/// Highest association id
pub const AID_MAX: u16 = 2007;

/// Stable handle to a peer descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    index: u32,
    generation: u32,
}

impl PeerId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// What a descriptor stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// The BSS itself: our access point in station mode, ourselves otherwise
    Bss,
    /// A station associated to us as access point
    Station,
    /// An ad-hoc neighbor
    Neighbor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    /// Open request sent, waiting for the response
    OpenPending,
    /// Shared-key challenge issued (responder) or answered (initiator)
    ShareChallengeSent,
    Authenticated,
}

/// Sequence table and fragment chain
#[derive(Debug, Default)]
pub struct RxState {
    pub seq: SequenceFilter,
    pub frag: Reassembler,
}

/// Authentication and negotiated association parameters
#[derive(Debug, Clone, Default)]
pub struct AssocState {
    pub auth: AuthState,
    pub challenge: Option<Box<[u8; CHALLENGE_LEN]>>,
    /// 802.1X port authorized
    pub authorized: bool,
    pub associd: u16,
    pub capinfo: u16,
    pub listen_interval: u16,
    pub rates: RateSet,
    pub ht: Option<HtCapabilities>,
    pub mcs: Option<McsSet>,
    pub rsn: Option<RsnParams>,
    /// Security element the peer associated with, for the key manager
    pub security_ie: Option<Bytes>,
    pub qos: bool,
    pub ath_caps: Option<AthCaps>,
    pub fails: u32,
    pub tstamp: u64,
    pub bintval: u16,
    pub erp: u8,
}

impl AssocState {
    pub fn is_associated(&self) -> bool {
        self.associd != 0
    }
}

/// Power-save state
#[derive(Debug, Default)]
pub struct PsState {
    pub power_save: bool,
    pub queue: VecDeque<Bytes>,
    /// Traffic indicator set in the beacon TIM
    pub tim: bool,
}

/// Per-peer receive counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerStats {
    pub rx_data: u64,
    pub rx_mgmt: u64,
    pub rx_ctrl: u64,
    pub rx_bytes: u64,
    pub rx_dup: u64,
    pub rx_beacons: u64,
    pub rx_auth_fail: u64,
    pub rx_deauth: u64,
    pub rx_disassoc: u64,
    pub rx_unauth: u64,
    pub rx_decap: u64,
    pub ps_queued: u64,
    pub ps_delivered: u64,
    pub ps_dropped: u64,
}

/// Signal metrics and activity
#[derive(Debug, Clone)]
pub struct LinkState {
    pub rssi: i8,
    pub noise: i8,
    pub rstamp: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub stats: PeerStats,
}

impl Default for LinkState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            rssi: 0,
            noise: 0,
            rstamp: 0,
            first_seen: now,
            last_seen: now,
            stats: PeerStats::default(),
        }
    }
}

impl LinkState {
    pub fn record_rx(&mut self, bytes: usize, rssi: i8, noise: i8, rstamp: u64) {
        self.rssi = rssi;
        self.noise = noise;
        self.rstamp = rstamp;
        self.last_seen = Utc::now();
        self.stats.rx_bytes += bytes as u64;
    }

    pub fn idle_time(&self) -> Duration {
        (Utc::now() - self.last_seen).to_std().unwrap_or_default()
    }
}

/// One peer
#[derive(Debug)]
pub struct PeerDescriptor {
    address: MacAddr,
    role: PeerRole,
    pub rx: Mutex<RxState>,
    pub assoc: Mutex<AssocState>,
    pub ps: Mutex<PsState>,
    pub link: Mutex<LinkState>,
}

impl PeerDescriptor {
    pub fn new(address: MacAddr, role: PeerRole) -> Self {
        Self {
            address,
            role,
            rx: Mutex::new(RxState::default()),
            assoc: Mutex::new(AssocState::default()),
            ps: Mutex::new(PsState::default()),
            link: Mutex::new(LinkState::default()),
        }
    }

    pub fn address(&self) -> MacAddr {
        self.address
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn associd(&self) -> u16 {
        self.assoc.lock().associd
    }

    pub fn is_authorized(&self) -> bool {
        self.assoc.lock().authorized
    }

    pub fn in_power_save(&self) -> bool {
        self.ps.lock().power_save
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    peer: Option<Arc<PeerDescriptor>>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_addr: HashMap<MacAddr, PeerId>,
    aids: BTreeSet<u16>,
}

impl Arena {
    fn get(&self, id: PeerId) -> Option<&Arc<PeerDescriptor>> {
        let slot = self.slots.get(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.peer.as_ref()
    }
}

/// Arena of peer descriptors shared between receive, transmit and control
#[derive(Debug)]
pub struct PeerTable {
    inner: RwLock<Arena>,
    max_peers: usize,
    max_aid: u16,
}

impl PeerTable {
    pub fn new(max_peers: usize) -> Self {
        Self {
            inner: RwLock::new(Arena::default()),
            max_peers,
            max_aid: AID_MAX.min(max_peers.max(1).min(u16::MAX as usize) as u16),
        }
    }

    /// Add a peer, or return the existing one with that address
    pub fn insert(&self, address: MacAddr, role: PeerRole) -> Result<(PeerId, Arc<PeerDescriptor>)> {
        let mut arena = self.inner.write();

        if let Some(&id) = arena.by_addr.get(&address) {
            if let Some(peer) = arena.get(id) {
                return Ok((id, Arc::clone(peer)));
            }
        }

        if arena.by_addr.len() >= self.max_peers {
            log::warn!("Maximum number of peers ({}) reached", self.max_peers);
            return Err(Dot11Error::TableFull);
        }

        let peer = Arc::new(PeerDescriptor::new(address, role));
        let index = match arena.free.pop() {
            Some(index) => {
                arena.slots[index].peer = Some(Arc::clone(&peer));
                index
            }
            None => {
                arena.slots.push(Slot {
                    generation: 0,
                    peer: Some(Arc::clone(&peer)),
                });
                arena.slots.len() - 1
            }
        };

        let id = PeerId {
            index: index as u32,
            generation: arena.slots[index].generation,
        };
        arena.by_addr.insert(address, id);
        log::debug!("Peer {} added as {:?} ({})", address, role, id);

        Ok((id, peer))
    }

    pub fn get(&self, id: PeerId) -> Option<Arc<PeerDescriptor>> {
        self.inner.read().get(id).cloned()
    }

    pub fn find(&self, address: &MacAddr) -> Option<(PeerId, Arc<PeerDescriptor>)> {
        let arena = self.inner.read();
        let id = *arena.by_addr.get(address)?;
        arena.get(id).map(|peer| (id, Arc::clone(peer)))
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.inner.read().get(id).is_some()
    }

    /// Remove a peer; its handle stops resolving
    pub fn remove(&self, id: PeerId) -> Option<Arc<PeerDescriptor>> {
        let mut arena = self.inner.write();
        let slot = arena.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let peer = slot.peer.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        arena.free.push(id.index());
        arena.by_addr.remove(&peer.address());
        log::debug!("Peer {} removed ({})", peer.address(), id);
        Some(peer)
    }

    pub fn peer_count(&self) -> usize {
        self.inner.read().by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peer_count() == 0
    }

    pub fn peers(&self) -> Vec<(PeerId, Arc<PeerDescriptor>)> {
        let arena = self.inner.read();
        arena
            .by_addr
            .values()
            .filter_map(|id| arena.get(*id).map(|peer| (*id, Arc::clone(peer))))
            .collect()
    }

    /// Allocate the lowest free association id
    pub fn alloc_aid(&self) -> Option<u16> {
        let mut arena = self.inner.write();
        let aid = (1..=self.max_aid).find(|aid| !arena.aids.contains(aid))?;
        arena.aids.insert(aid);
        Some(aid)
    }

    pub fn free_aid(&self, aid: u16) {
        self.inner.write().aids.remove(&aid);
    }

    pub fn aids_in_use(&self) -> usize {
        self.inner.read().aids.len()
    }

    /// Discard fragment chains at least `max_age` old; returns how many
    pub fn expire_fragments(&self, max_age: Duration) -> usize {
        self.peers()
            .into_iter()
            .filter(|(_, peer)| peer.rx.lock().frag.expire(max_age))
            .count()
    }

    /// Peers idle for longer than `timeout`, the BSS entry excepted
    pub fn inactive_peers(&self, timeout: Duration) -> Vec<(PeerId, MacAddr)> {
        self.peers()
            .into_iter()
            .filter(|(_, peer)| peer.role() != PeerRole::Bss && peer.link.lock().idle_time() > timeout)
            .map(|(id, peer)| (id, peer.address()))
            .collect()
    }
}
