//! Legacy rate sets and HT MCS sets
//!
//! Rates are in 500 kb/s units with the high bit marking a basic
//! (mandatory) rate.

use serde::{Deserialize, Serialize};

pub const RATE_BASIC: u8 = 0x80;
pub const RATE_VAL: u8 = 0x7f;
/// Largest number of rates carried in rates + extended rates
pub const RATE_MAXSIZE: usize = 15;

/// 24 Mb/s, the floor for pure-G associations
pub const PUREG_MIN_RATE: u8 = 48;

/// Number of MCS indices in the HT supported MCS bitmap
pub const HT_MCS_COUNT: usize = 77;
pub const HT_MCS_BYTES: usize = 10;

pub const HT_CAP_LEN: usize = 26;
pub const HT_INFO_LEN: usize = 22;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSet {
    rates: Vec<u8>,
}

impl RateSet {
    pub fn new(rates: &[u8]) -> Self {
        Self { rates: rates.to_vec() }
    }

    /// Combine a rates element with an optional extended rates element,
    /// keeping at most [`RATE_MAXSIZE`] entries.
    pub fn from_elements(rates: &[u8], xrates: Option<&[u8]>) -> Self {
        let mut set = Self::new(rates);
        if let Some(xrates) = xrates {
            set.rates.extend_from_slice(xrates);
        }
        set.rates.truncate(RATE_MAXSIZE);
        set
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.rates
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Whether a rate (value only) is a member
    pub fn contains(&self, rate: u8) -> bool {
        self.find(rate).is_some()
    }

    fn find(&self, rate: u8) -> Option<u8> {
        self.rates
            .iter()
            .copied()
            .find(|r| r & RATE_VAL == rate & RATE_VAL)
    }

    pub fn basic(&self) -> impl Iterator<Item = u8> + '_ {
        self.rates
            .iter()
            .filter(|r| *r & RATE_BASIC != 0)
            .map(|r| r & RATE_VAL)
    }

    /// Highest rate value
    pub fn max_rate(&self) -> u8 {
        self.rates.iter().map(|r| r & RATE_VAL).max().unwrap_or(0)
    }

    /// Strip the basic flags
    pub fn without_basic(&self) -> Self {
        Self {
            rates: self.rates.iter().map(|r| r & RATE_VAL).collect(),
        }
    }

    fn sorted(&self) -> Vec<u8> {
        let mut rates = self.rates.clone();
        rates.sort_by_key(|r| r & RATE_VAL);
        rates.dedup_by_key(|r| *r & RATE_VAL);
        rates
    }
}

/// Negotiate the rates a peer offered against the local set.
///
/// The result keeps the local entries (and their basic flags) that the peer
/// also offered, sorted ascending. Negotiation fails with the offending rate
/// when the intersection is empty, when a rate either side marks basic is
/// missing from it, or when `fixed` is set and not in it.
pub fn negotiate(local: &RateSet, offered: &RateSet, fixed: Option<u8>) -> Result<RateSet, u8> {
    let mut result = Vec::with_capacity(RATE_MAXSIZE);

    for rate in offered.sorted() {
        match local.find(rate) {
            Some(local_rate) => result.push(local_rate),
            None if rate & RATE_BASIC != 0 => return Err(rate & RATE_VAL),
            None => {}
        }
    }

    let negotiated = RateSet { rates: result };
    if negotiated.is_empty() {
        return Err(offered.max_rate());
    }
    if let Some(missing) = local.basic().find(|r| !negotiated.contains(*r)) {
        return Err(missing);
    }
    if let Some(fixed) = fixed {
        if !negotiated.contains(fixed) {
            return Err(fixed & RATE_VAL);
        }
    }

    Ok(negotiated)
}

/// HT supported-MCS bitmap
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McsSet([u8; HT_MCS_BYTES]);

impl McsSet {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut set = [0u8; HT_MCS_BYTES];
        let n = bytes.len().min(HT_MCS_BYTES);
        set[..n].copy_from_slice(&bytes[..n]);
        // bits past MCS 76 are reserved
        set[HT_MCS_BYTES - 1] &= 0x1f;
        Self(set)
    }

    pub fn from_indices(indices: &[u8]) -> Self {
        let mut set = Self::default();
        for &mcs in indices {
            set.insert(mcs);
        }
        set
    }

    pub fn insert(&mut self, mcs: u8) {
        if (mcs as usize) < HT_MCS_COUNT {
            self.0[mcs as usize / 8] |= 1 << (mcs % 8);
        }
    }

    pub fn contains(&self, mcs: u8) -> bool {
        (mcs as usize) < HT_MCS_COUNT && self.0[mcs as usize / 8] & (1 << (mcs % 8)) != 0
    }

    pub fn intersection(&self, other: &McsSet) -> McsSet {
        let mut set = [0u8; HT_MCS_BYTES];
        for (i, b) in set.iter_mut().enumerate() {
            *b = self.0[i] & other.0[i];
        }
        McsSet(set)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..HT_MCS_COUNT as u8).filter(move |mcs| self.contains(*mcs))
    }
}

/// Negotiate HT MCS sets; every basic MCS must survive the intersection.
pub fn negotiate_mcs(local: &McsSet, offered: &McsSet, basic: &McsSet) -> Result<McsSet, u8> {
    let negotiated = local.intersection(offered);
    if negotiated.is_empty() {
        return Err(0);
    }
    if let Some(missing) = basic.iter().find(|mcs| !negotiated.contains(*mcs)) {
        return Err(missing);
    }
    Ok(negotiated)
}

/// HT capabilities element (standard or pre-standard vendor form)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtCapabilities {
    pub cap_info: u16,
    pub ampdu_params: u8,
    pub mcs: McsSet,
}

impl HtCapabilities {
    /// Parse element data; `None` unless exactly the full length
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != HT_CAP_LEN {
            return None;
        }
        Some(Self {
            cap_info: u16::from_le_bytes([data[0], data[1]]),
            ampdu_params: data[2],
            mcs: McsSet::from_bytes(&data[3..3 + HT_MCS_BYTES]),
        })
    }
}

/// HT information element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtInfo {
    pub primary_channel: u8,
    pub byte1: u8,
    pub op_mode: u16,
    pub stbc: u16,
    pub basic_mcs: McsSet,
}

impl HtInfo {
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() != HT_INFO_LEN {
            return None;
        }
        Some(Self {
            primary_channel: data[0],
            byte1: data[1],
            op_mode: u16::from_le_bytes([data[2], data[3]]),
            stbc: u16::from_le_bytes([data[4], data[5]]),
            basic_mcs: McsSet::from_bytes(&data[6..6 + HT_MCS_BYTES]),
        })
    }
}
