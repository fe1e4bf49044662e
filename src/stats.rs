//! Receive-path counters
//!
//! Every discard increments exactly one [`Counter`]. A handful of counters
//! record events rather than drops (beacons tracked, frames delivered).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Counter {
    // header validation
    TooShort,
    BadVersion,
    BadType,
    WrongDirection,
    WrongBss,
    McastEcho,
    Monitor,
    Control,
    // data path
    Duplicate,
    Defrag,
    NotAssociated,
    NoData,
    NoPrivacy,
    DecryptFailed,
    Decap,
    AmsduTooShort,
    AmsduLength,
    FastFrame,
    Unauthorized,
    Unencrypted,
    Delivered,
    // management
    BadSubtype,
    MgmtDiscard,
    ElementMissing,
    ElementTooBig,
    ElementUnknown,
    SsidMismatch,
    ChannelMismatch,
    BadBeaconInterval,
    RateMismatch,
    Beacon,
    ProbeResp,
    NoResources,
    Acl,
    AuthUnsupported,
    AuthFail,
    BadAuth,
    AssocNotAuth,
    BadWpaIe,
    CapMismatch,
    AssocNoRate,
    AssocFail,
    AssocTooMany,
    HtNoRate,
    HtRequired,
    Deauth,
    Disassoc,
    // power save
    PsUnassoc,
    PsBadAid,
    PsQueueEmpty,
    PsQueueOverflow,
}

impl Counter {
    pub const ALL: [Counter; 51] = [
        Counter::TooShort,
        Counter::BadVersion,
        Counter::BadType,
        Counter::WrongDirection,
        Counter::WrongBss,
        Counter::McastEcho,
        Counter::Monitor,
        Counter::Control,
        Counter::Duplicate,
        Counter::Defrag,
        Counter::NotAssociated,
        Counter::NoData,
        Counter::NoPrivacy,
        Counter::DecryptFailed,
        Counter::Decap,
        Counter::AmsduTooShort,
        Counter::AmsduLength,
        Counter::FastFrame,
        Counter::Unauthorized,
        Counter::Unencrypted,
        Counter::Delivered,
        Counter::BadSubtype,
        Counter::MgmtDiscard,
        Counter::ElementMissing,
        Counter::ElementTooBig,
        Counter::ElementUnknown,
        Counter::SsidMismatch,
        Counter::ChannelMismatch,
        Counter::BadBeaconInterval,
        Counter::RateMismatch,
        Counter::Beacon,
        Counter::ProbeResp,
        Counter::NoResources,
        Counter::Acl,
        Counter::AuthUnsupported,
        Counter::AuthFail,
        Counter::BadAuth,
        Counter::AssocNotAuth,
        Counter::BadWpaIe,
        Counter::CapMismatch,
        Counter::AssocNoRate,
        Counter::AssocFail,
        Counter::AssocTooMany,
        Counter::HtNoRate,
        Counter::HtRequired,
        Counter::Deauth,
        Counter::Disassoc,
        Counter::PsUnassoc,
        Counter::PsBadAid,
        Counter::PsQueueEmpty,
        Counter::PsQueueOverflow,
    ];

    pub const COUNT: usize = Self::ALL.len();

    fn index(self) -> usize {
        self as usize
    }
}

/// Atomic counter table shared between the receive path and readers
#[derive(Debug)]
pub struct Stats {
    counters: [AtomicU64; Counter::COUNT],
    start_time: DateTime<Utc>,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            start_time: Utc::now(),
        }
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Sum of all counters
    pub fn total(&self) -> u64 {
        self.counters.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn uptime(&self) -> Duration {
        (Utc::now() - self.start_time).to_std().unwrap_or_default()
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Non-zero counters at this instant
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = Counter::ALL
            .iter()
            .map(|c| (*c, self.get(*c)))
            .filter(|(_, v)| *v > 0)
            .collect();

        StatsSnapshot {
            counters,
            start_time: self.start_time,
            taken_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub counters: BTreeMap<Counter, u64>,
    pub start_time: DateTime<Utc>,
    pub taken_at: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }
}
