//! WPA / RSN element parsing and cipher negotiation

use bytes::Buf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::element::WPA_OUI;
use crate::frame::reason;

pub const RSN_OUI: [u8; 3] = [0x00, 0x0f, 0xac];

/// Minimum WPA element data length (OUI, type, version, group suite, counts)
pub const WPA_MIN_LEN: usize = 14;
/// Minimum RSN element data length
pub const RSN_MIN_LEN: usize = 10;
pub const WPA_VERSION: u16 = 1;
pub const RSN_VERSION: u16 = 1;

const SEL_WEP40: u8 = 1;
const SEL_TKIP: u8 = 2;
const SEL_WRAP: u8 = 3;
const SEL_CCMP: u8 = 4;
const SEL_WEP104: u8 = 5;

const SEL_AKM_8021X: u8 = 1;
const SEL_AKM_PSK: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cipher {
    Wep,
    Tkip,
    AesOcb,
    AesCcm,
}

/// Unicast cipher preference, most preferred first.
pub const UNICAST_PREFERENCE: [Cipher; 4] = [Cipher::Tkip, Cipher::AesCcm, Cipher::AesOcb, Cipher::Wep];

impl Cipher {
    fn from_selector(sel: u8) -> Option<Self> {
        match sel {
            SEL_WEP40 | SEL_WEP104 => Some(Self::Wep),
            SEL_TKIP => Some(Self::Tkip),
            SEL_WRAP => Some(Self::AesOcb),
            SEL_CCMP => Some(Self::AesCcm),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMgmt {
    Ieee8021x,
    Psk,
}

/// Key management preference, most preferred first.
pub const KEY_MGMT_PREFERENCE: [KeyMgmt; 2] = [KeyMgmt::Ieee8021x, KeyMgmt::Psk];

impl KeyMgmt {
    fn from_selector(sel: u8) -> Option<Self> {
        match sel {
            SEL_AKM_8021X => Some(Self::Ieee8021x),
            SEL_AKM_PSK => Some(Self::Psk),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of unicast ciphers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherSet(u8);

impl CipherSet {
    pub fn insert(&mut self, cipher: Cipher) {
        self.0 |= cipher.bit();
    }

    pub fn contains(&self, cipher: Cipher) -> bool {
        self.0 & cipher.bit() != 0
    }

    pub fn intersection(&self, other: &CipherSet) -> CipherSet {
        CipherSet(self.0 & other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Most preferred member
    pub fn preferred(&self) -> Option<Cipher> {
        UNICAST_PREFERENCE.iter().copied().find(|c| self.contains(*c))
    }
}

impl FromIterator<Cipher> for CipherSet {
    fn from_iter<I: IntoIterator<Item = Cipher>>(iter: I) -> Self {
        let mut set = CipherSet::default();
        for cipher in iter {
            set.insert(cipher);
        }
        set
    }
}

/// Set of key management suites
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMgmtSet(u8);

impl KeyMgmtSet {
    pub fn insert(&mut self, km: KeyMgmt) {
        self.0 |= km.bit();
    }

    pub fn contains(&self, km: KeyMgmt) -> bool {
        self.0 & km.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn preferred_in(&self, other: &KeyMgmtSet) -> Option<KeyMgmt> {
        KEY_MGMT_PREFERENCE
            .iter()
            .copied()
            .find(|km| self.contains(*km) && other.contains(*km))
    }
}

impl FromIterator<KeyMgmt> for KeyMgmtSet {
    fn from_iter<I: IntoIterator<Item = KeyMgmt>>(iter: I) -> Self {
        let mut set = KeyMgmtSet::default();
        for km in iter {
            set.insert(km);
        }
        set
    }
}

/// Which element a negotiation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityIe {
    Wpa,
    Rsn,
}

/// Locally configured WPA / RSN policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub wpa: bool,
    pub rsn: bool,
    pub mcast_cipher: Cipher,
    pub ucast_ciphers: CipherSet,
    pub key_mgmt: KeyMgmtSet,
}

/// Negotiated security parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsnParams {
    pub ie: SecurityIe,
    pub mcast_cipher: Cipher,
    pub ucast_cipher: Cipher,
    pub key_mgmt: KeyMgmt,
    pub caps: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SecurityError {
    #[error("{0:?} element not enabled by local policy")]
    NotEnabled(SecurityIe),

    #[error("element too short or truncated: {0}")]
    Truncated(&'static str),

    #[error("unsupported version {0}")]
    BadVersion(u16),

    #[error("group cipher does not match local policy")]
    GroupCipher,

    #[error("no acceptable pairwise cipher offered")]
    PairwiseCipher,

    #[error("no acceptable key management suite offered")]
    KeyMgmt,

    #[error("malformed capabilities field")]
    InvalidCaps,

    #[error("no WPA or RSN element offered")]
    Missing,
}

impl SecurityError {
    /// Deauthentication reason code reported to the peer
    pub fn reason_code(&self) -> u16 {
        match self {
            Self::NotEnabled(_) | Self::Truncated(_) | Self::Missing => reason::IE_INVALID,
            Self::BadVersion(_) => reason::UNSUPP_RSN_IE_VERSION,
            Self::GroupCipher => reason::GROUP_CIPHER_INVALID,
            Self::PairwiseCipher => reason::PAIRWISE_CIPHER_INVALID,
            Self::KeyMgmt => reason::AKMP_INVALID,
            Self::InvalidCaps => reason::INVALID_RSN_IE_CAP,
        }
    }
}

type Negotiation = std::result::Result<RsnParams, SecurityError>;

/// Parse and negotiate a WPA vendor element (data starts at the OUI)
pub fn parse_wpa(data: &[u8], policy: &SecurityPolicy) -> Negotiation {
    if !policy.wpa {
        return Err(SecurityError::NotEnabled(SecurityIe::Wpa));
    }
    if data.len() < WPA_MIN_LEN {
        return Err(SecurityError::Truncated("fixed fields"));
    }

    let mut buf = &data[4..];
    let version = buf.get_u16_le();
    if version != WPA_VERSION {
        return Err(SecurityError::BadVersion(version));
    }

    negotiate_suites(buf, WPA_OUI, SecurityIe::Wpa, policy)
}

/// Parse and negotiate an RSN element
pub fn parse_rsn(data: &[u8], policy: &SecurityPolicy) -> Negotiation {
    if !policy.rsn {
        return Err(SecurityError::NotEnabled(SecurityIe::Rsn));
    }
    if data.len() < RSN_MIN_LEN {
        return Err(SecurityError::Truncated("fixed fields"));
    }

    let mut buf = data;
    let version = buf.get_u16_le();
    if version != RSN_VERSION {
        return Err(SecurityError::BadVersion(version));
    }

    negotiate_suites(buf, RSN_OUI, SecurityIe::Rsn, policy)
}

/// Selector type byte when the OUI matches
fn read_selector(buf: &mut &[u8], oui: [u8; 3]) -> Option<u8> {
    let sel = [buf[0], buf[1], buf[2], buf[3]];
    buf.advance(4);
    (sel[..3] == oui).then_some(sel[3])
}

fn read_count(buf: &mut &[u8], what: &'static str) -> std::result::Result<usize, SecurityError> {
    if buf.remaining() < 2 {
        return Err(SecurityError::Truncated(what));
    }
    let count = buf.get_u16_le() as usize;
    if buf.remaining() < count * 4 {
        return Err(SecurityError::Truncated(what));
    }
    Ok(count)
}

fn negotiate_suites(mut buf: &[u8], oui: [u8; 3], ie: SecurityIe, policy: &SecurityPolicy) -> Negotiation {
    if buf.remaining() < 4 {
        return Err(SecurityError::Truncated("group cipher"));
    }
    let mcast = read_selector(&mut buf, oui).and_then(Cipher::from_selector);
    if mcast != Some(policy.mcast_cipher) {
        return Err(SecurityError::GroupCipher);
    }

    let count = read_count(&mut buf, "pairwise cipher list")?;
    let offered: CipherSet = (0..count)
        .filter_map(|_| read_selector(&mut buf, oui))
        .filter_map(Cipher::from_selector)
        .collect();
    let ucast_cipher = offered
        .intersection(&policy.ucast_ciphers)
        .preferred()
        .ok_or(SecurityError::PairwiseCipher)?;

    let count = read_count(&mut buf, "key management list")?;
    let offered_km: KeyMgmtSet = (0..count)
        .filter_map(|_| read_selector(&mut buf, oui))
        .filter_map(KeyMgmt::from_selector)
        .collect();
    let key_mgmt = offered_km
        .preferred_in(&policy.key_mgmt)
        .ok_or(SecurityError::KeyMgmt)?;

    let caps = match buf.remaining() {
        0 => 0,
        1 => return Err(SecurityError::InvalidCaps),
        _ => buf.get_u16_le(),
    };

    Ok(RsnParams {
        ie,
        mcast_cipher: policy.mcast_cipher,
        ucast_cipher,
        key_mgmt,
        caps,
    })
}
