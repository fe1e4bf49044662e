//! IEEE 802.11 frame structures and parsing
//!
//! This module contains the receive-side view of an 802.11 MAC header, the
//! numeric constants shared by the rest of the engine and the Ethernet-style
//! frame that decapsulation hands to the bridging layer.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;
use crate::{Dot11Error, Result};

/// Hardware address length
pub const ADDR_LEN: usize = 6;
/// Frame control + duration + addr1 + addr2
pub const MIN_FRAME_LEN: usize = 16;
/// Three-address header with sequence control
pub const HDR_LEN: usize = 24;
pub const QOS_CTL_LEN: usize = 2;

/// Number of QoS traffic identifiers
pub const NUM_TID: usize = 16;
/// Sequence table slot used for non-QoS frames
pub const NONQOS_TID: usize = NUM_TID;

pub const FC0_VERSION_MASK: u8 = 0x03;
pub const FC0_TYPE_MASK: u8 = 0x0c;
pub const FC0_TYPE_SHIFT: u8 = 2;
pub const FC0_SUBTYPE_SHIFT: u8 = 4;

pub const FC1_DIR_MASK: u8 = 0x03;
pub const FC1_MORE_FRAG: u8 = 0x04;
pub const FC1_RETRY: u8 = 0x08;
pub const FC1_PWR_MGT: u8 = 0x10;
pub const FC1_MORE_DATA: u8 = 0x20;
pub const FC1_PROTECTED: u8 = 0x40;
pub const FC1_ORDER: u8 = 0x80;

/// Data subtype bit: no payload (Null / QoS-Null)
pub const DATA_SUBTYPE_NODATA: u8 = 0x04;
/// Data subtype bit: QoS control field present
pub const DATA_SUBTYPE_QOS: u8 = 0x08;

pub const CTL_SUBTYPE_PS_POLL: u8 = 0x0a;

pub const QOS_TID_MASK: u16 = 0x000f;
pub const QOS_AMSDU: u16 = 0x0080;

pub const SEQ_FRAG_MASK: u16 = 0x000f;
pub const SEQ_SHIFT: u16 = 4;

/// Capability information bits
pub mod capinfo {
    pub const ESS: u16 = 0x0001;
    pub const IBSS: u16 = 0x0002;
    pub const PRIVACY: u16 = 0x0010;
    pub const SHORT_PREAMBLE: u16 = 0x0020;
    pub const PBCC: u16 = 0x0040;
    pub const CHANNEL_AGILITY: u16 = 0x0080;
    pub const SHORT_SLOTTIME: u16 = 0x0400;
    pub const DSSSOFDM: u16 = 0x2000;
}

/// Status codes carried in authentication and association responses
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const UNSPECIFIED: u16 = 1;
    pub const CAPINFO: u16 = 10;
    pub const NOT_ASSOCED: u16 = 11;
    pub const OTHER: u16 = 12;
    pub const ALG: u16 = 13;
    pub const SEQUENCE: u16 = 14;
    pub const CHALLENGE: u16 = 15;
    pub const TIMEOUT: u16 = 16;
    pub const TOOMANY: u16 = 17;
    pub const BASIC_RATE: u16 = 18;
    pub const NO_HT: u16 = 27;
}

/// Reason codes carried in deauthentication and disassociation frames
pub mod reason {
    pub const UNSPECIFIED: u16 = 1;
    pub const AUTH_EXPIRE: u16 = 2;
    pub const AUTH_LEAVE: u16 = 3;
    pub const ASSOC_EXPIRE: u16 = 4;
    pub const ASSOC_TOOMANY: u16 = 5;
    pub const NOT_AUTHED: u16 = 6;
    pub const NOT_ASSOCED: u16 = 7;
    pub const ASSOC_LEAVE: u16 = 8;
    pub const ASSOC_NOT_AUTHED: u16 = 9;
    pub const IE_INVALID: u16 = 13;
    pub const GROUP_CIPHER_INVALID: u16 = 18;
    pub const PAIRWISE_CIPHER_INVALID: u16 = 19;
    pub const AKMP_INVALID: u16 = 20;
    pub const UNSUPP_RSN_IE_VERSION: u16 = 21;
    pub const INVALID_RSN_IE_CAP: u16 = 22;
}

/// Ether-types the receive path treats specially
pub mod ethertype {
    /// 802.1X port access entity (EAPOL)
    pub const PAE: u16 = 0x888e;
    pub const AARP: u16 = 0x80f3;
    pub const IPX: u16 = 0x8137;
    /// Atheros fast-frame tunnel
    pub const FAST_FRAME: u16 = 0x88bd;
}

/// 48-bit IEEE hardware address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddr(pub [u8; ADDR_LEN]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; ADDR_LEN]);
    pub const ZERO: MacAddr = MacAddr([0; ADDR_LEN]);

    pub fn new(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }

    /// Read an address from the first six bytes of a slice
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; ADDR_LEN] = data.get(..ADDR_LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }

    /// Group (multicast or broadcast) address
    pub fn is_group(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    fn read(buf: &mut impl Buf) -> Self {
        let mut bytes = [0u8; ADDR_LEN];
        buf.copy_to_slice(&mut bytes);
        Self(bytes)
    }
}

impl From<[u8; ADDR_LEN]> for MacAddr {
    fn from(bytes: [u8; ADDR_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = Dot11Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; ADDR_LEN];
        let mut parts = s.split(|c: char| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Dot11Error::Parse(format!("Invalid MAC address: {}", s)))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Dot11Error::Parse(format!("Invalid MAC address: {}", s)))?;
        }

        if parts.next().is_some() {
            return Err(Dot11Error::Parse(format!("Invalid MAC address: {}", s)));
        }

        Ok(Self(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Frame type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    Management,
    Control,
    Data,
    Reserved,
}

impl From<u8> for FrameType {
    fn from(fc0: u8) -> Self {
        match (fc0 & FC0_TYPE_MASK) >> FC0_TYPE_SHIFT {
            0 => Self::Management,
            1 => Self::Control,
            2 => Self::Data,
            _ => Self::Reserved,
        }
    }
}

/// Management frame subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MgmtSubtype {
    AssocReq,
    AssocResp,
    ReassocReq,
    ReassocResp,
    ProbeReq,
    ProbeResp,
    Beacon,
    Atim,
    Disassoc,
    Auth,
    Deauth,
    Action,
    Reserved(u8),
}

impl From<u8> for MgmtSubtype {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::AssocReq,
            1 => Self::AssocResp,
            2 => Self::ReassocReq,
            3 => Self::ReassocResp,
            4 => Self::ProbeReq,
            5 => Self::ProbeResp,
            8 => Self::Beacon,
            9 => Self::Atim,
            10 => Self::Disassoc,
            11 => Self::Auth,
            12 => Self::Deauth,
            13 => Self::Action,
            other => Self::Reserved(other),
        }
    }
}

impl From<MgmtSubtype> for u8 {
    fn from(subtype: MgmtSubtype) -> Self {
        match subtype {
            MgmtSubtype::AssocReq => 0,
            MgmtSubtype::AssocResp => 1,
            MgmtSubtype::ReassocReq => 2,
            MgmtSubtype::ReassocResp => 3,
            MgmtSubtype::ProbeReq => 4,
            MgmtSubtype::ProbeResp => 5,
            MgmtSubtype::Beacon => 8,
            MgmtSubtype::Atim => 9,
            MgmtSubtype::Disassoc => 10,
            MgmtSubtype::Auth => 11,
            MgmtSubtype::Deauth => 12,
            MgmtSubtype::Action => 13,
            MgmtSubtype::Reserved(val) => val,
        }
    }
}

/// Distribution system direction bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    NoDs,
    ToDs,
    FromDs,
    DsToDs,
}

impl From<u8> for Direction {
    fn from(fc1: u8) -> Self {
        match fc1 & FC1_DIR_MASK {
            0 => Self::NoDs,
            1 => Self::ToDs,
            2 => Self::FromDs,
            _ => Self::DsToDs,
        }
    }
}

/// Parsed 802.11 MAC header
///
/// Control frames only carry the first two addresses; `addr3` is zero and
/// `seq_ctl` is zero for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dot11Header {
    pub fc: [u8; 2],
    pub duration: u16,
    pub addr1: MacAddr,
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub seq_ctl: u16,
    pub addr4: Option<MacAddr>,
    pub qos: Option<u16>,
    /// Header length in bytes
    pub len: usize,
}

impl Dot11Header {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_FRAME_LEN {
            return Err(Dot11Error::Truncated {
                needed: MIN_FRAME_LEN,
                available: data.len(),
            });
        }

        let fc = [data[0], data[1]];
        let frame_type = FrameType::from(fc[0]);
        let direction = Direction::from(fc[1]);

        let mut buf = &data[2..];
        let duration = buf.get_u16_le();
        let addr1 = MacAddr::read(&mut buf);
        let addr2 = MacAddr::read(&mut buf);

        if matches!(frame_type, FrameType::Control | FrameType::Reserved) {
            return Ok(Self {
                fc,
                duration,
                addr1,
                addr2,
                addr3: MacAddr::ZERO,
                seq_ctl: 0,
                addr4: None,
                qos: None,
                len: MIN_FRAME_LEN,
            });
        }

        let four_addr = direction == Direction::DsToDs;
        let has_qos = frame_type == FrameType::Data
            && (fc[0] >> FC0_SUBTYPE_SHIFT) & DATA_SUBTYPE_QOS != 0;
        let mut len = HDR_LEN;
        if four_addr {
            len += ADDR_LEN;
        }
        if has_qos {
            len += QOS_CTL_LEN;
        }
        if data.len() < len {
            return Err(Dot11Error::Truncated {
                needed: len,
                available: data.len(),
            });
        }

        let addr3 = MacAddr::read(&mut buf);
        let seq_ctl = buf.get_u16_le();
        let addr4 = if four_addr { Some(MacAddr::read(&mut buf)) } else { None };
        let qos = if has_qos { Some(buf.get_u16_le()) } else { None };

        Ok(Self {
            fc,
            duration,
            addr1,
            addr2,
            addr3,
            seq_ctl,
            addr4,
            qos,
            len,
        })
    }

    pub fn version(&self) -> u8 {
        self.fc[0] & FC0_VERSION_MASK
    }

    pub fn frame_type(&self) -> FrameType {
        FrameType::from(self.fc[0])
    }

    /// Raw 4-bit subtype
    pub fn subtype(&self) -> u8 {
        self.fc[0] >> FC0_SUBTYPE_SHIFT
    }

    pub fn mgmt_subtype(&self) -> MgmtSubtype {
        MgmtSubtype::from(self.subtype())
    }

    pub fn direction(&self) -> Direction {
        Direction::from(self.fc[1])
    }

    pub fn more_frag(&self) -> bool {
        self.fc[1] & FC1_MORE_FRAG != 0
    }

    pub fn retry(&self) -> bool {
        self.fc[1] & FC1_RETRY != 0
    }

    pub fn pwr_mgt(&self) -> bool {
        self.fc[1] & FC1_PWR_MGT != 0
    }

    pub fn more_data(&self) -> bool {
        self.fc[1] & FC1_MORE_DATA != 0
    }

    pub fn protected(&self) -> bool {
        self.fc[1] & FC1_PROTECTED != 0
    }

    /// Data frame without payload (Null / QoS-Null)
    pub fn is_null_data(&self) -> bool {
        self.frame_type() == FrameType::Data && self.subtype() & DATA_SUBTYPE_NODATA != 0
    }

    pub fn sequence(&self) -> u16 {
        self.seq_ctl >> SEQ_SHIFT
    }

    pub fn fragment(&self) -> u8 {
        (self.seq_ctl & SEQ_FRAG_MASK) as u8
    }

    /// Index into the per-peer sequence table
    pub fn tid_index(&self) -> usize {
        match self.qos {
            Some(qos) => (qos & QOS_TID_MASK) as usize,
            None => NONQOS_TID,
        }
    }

    /// QoS control announces an aggregated MSDU
    pub fn is_amsdu(&self) -> bool {
        self.qos.map_or(false, |qos| qos & QOS_AMSDU != 0)
    }

    /// BSSID field for the frame's direction
    pub fn bssid(&self) -> MacAddr {
        match self.direction() {
            Direction::NoDs => self.addr3,
            Direction::ToDs => self.addr1,
            Direction::FromDs => self.addr2,
            Direction::DsToDs => self.addr1,
        }
    }

    /// Association id carried in a PS-Poll duration field
    pub fn ps_poll_aid(&self) -> u16 {
        self.duration & 0x3fff
    }
}

/// Ethernet-style frame handed to the bridging layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtherFrame {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// Ether-type, or payload length for raw 802.3 frames
    pub ether_type: u16,
    pub payload: Bytes,
}

pub const ETHER_HDR_LEN: usize = 14;

impl EtherFrame {
    /// Create a new link-layer frame
    pub fn new(dst: MacAddr, src: MacAddr, ether_type: u16, payload: Bytes) -> Self {
        Self {
            dst,
            src,
            ether_type,
            payload,
        }
    }

    /// Parse a link-layer frame from buffer
    pub fn parse(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < ETHER_HDR_LEN {
            return Err(Dot11Error::Parse("Insufficient data for Ethernet header".to_string()));
        }

        let dst = MacAddr::read(buf);
        let src = MacAddr::read(buf);
        let ether_type = buf.get_u16();
        let payload = buf.copy_to_bytes(buf.remaining());

        Ok(Self {
            dst,
            src,
            ether_type,
            payload,
        })
    }

    /// Serialize the frame to buffer
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.dst.as_bytes());
        buf.put_slice(self.src.as_bytes());
        buf.put_u16(self.ether_type);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        self.serialize(&mut buf);
        buf.freeze()
    }

    /// Get the total size of the frame when serialized
    pub fn size(&self) -> usize {
        ETHER_HDR_LEN + self.payload.len()
    }

    pub fn is_eapol(&self) -> bool {
        self.ether_type == ethertype::PAE
    }
}
