//! Local interface state
//!
//! This module contains the state the receive path keeps about our own
//! interface: operating mode, the 802.11 state machine position and the
//! parameters of the BSS we run or joined.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::MacAddr;
use crate::peers::PeerId;
use crate::rates::{HtCapabilities, HtInfo};
use crate::scan::WmeParams;

/// Operating role of the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpMode {
    #[default]
    Station,
    HostAp,
    AdHoc,
    Monitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhyMode {
    Dot11a,
    Dot11b,
    #[default]
    Dot11g,
    /// Frequency hopping
    Fh,
}

/// 802.11 state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Interface is down
    #[default]
    Init,
    /// Looking for a network
    Scan,
    /// Authenticating with the chosen BSS
    Auth,
    /// Associating with the chosen BSS
    Assoc,
    /// Operational
    Run,
}

/// Parameters of the BSS we run (AP / ad-hoc) or joined (station)
#[derive(Debug, Clone, Default)]
pub struct BssState {
    pub bssid: MacAddr,
    pub ssid: Vec<u8>,
    pub channel: u8,
    pub capinfo: u16,
    pub bintval: u16,
    pub tstamp: u64,
    pub dtim_period: u8,
    pub dtim_count: u8,
    pub erp: u8,
    pub wme_param_count: Option<u8>,
    pub wme: Option<WmeParams>,
    pub ht_cap: Option<HtCapabilities>,
    pub ht_info: Option<HtInfo>,
    pub rsn_ie: Option<Bytes>,
    pub wpa_ie: Option<Bytes>,
}

/// Operating flags derived from negotiation and beacons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpFlags {
    pub short_preamble: bool,
    pub short_slot: bool,
    /// 11g protection for OFDM frames
    pub protection: bool,
    pub scanning: bool,
    /// Local station is dozing
    pub power_save: bool,
    pub qos: bool,
    pub ht: bool,
}

#[derive(Debug, Clone)]
pub struct IfaceState {
    pub address: MacAddr,
    pub mode: OpMode,
    pub phy: PhyMode,
    pub state: NodeState,
    pub bss: BssState,
    pub flags: OpFlags,
    /// Descriptor of the BSS entry
    pub bss_peer: Option<PeerId>,
    /// Our association id when running as a station
    pub associd: u16,
    pub last_activity: DateTime<Utc>,
}

impl IfaceState {
    pub fn new(address: MacAddr, mode: OpMode, phy: PhyMode) -> Self {
        Self {
            address,
            mode,
            phy,
            state: NodeState::Init,
            bss: BssState::default(),
            flags: OpFlags::default(),
            bss_peer: None,
            associd: 0,
            last_activity: Utc::now(),
        }
    }

    /// Update last activity timestamp
    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Move the state machine; returns the previous state
    pub fn set_state(&mut self, state: NodeState) -> NodeState {
        let previous = self.state;
        if previous != state {
            log::info!("Node state transition: {:?} -> {:?}", previous, state);
        }
        self.state = state;
        self.update_activity();
        previous
    }

    pub fn is_running(&self) -> bool {
        self.state == NodeState::Run
    }

    /// Station mode with a BSS chosen
    pub fn joined(&self) -> bool {
        self.bss_peer.is_some() && !self.bss.bssid.is_zero()
    }

    /// 11g with protection-relevant ERP
    pub fn is_11g(&self) -> bool {
        self.phy == PhyMode::Dot11g
    }
}
