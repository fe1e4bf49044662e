//! Frame dispatcher
//!
//! [`RxEngine::input`] is the single entry point for received frames. It
//! validates the header against the operating mode, resolves the sender,
//! filters duplicates and hands the frame to the data path or to the
//! management and control handlers implemented in the sibling modules.
//!
//! Handlers return a [`Verdict`]: `Err(counter)` discards the frame and the
//! dispatcher increments that counter exactly once.

use bytes::Bytes;
use std::sync::Arc;

use crate::config::{AuthMode, ConfigManager, EngineConfig, LocalPolicy};
use crate::element::ERP_USE_PROTECTION;
use crate::event::{DiscoveryReason, LifecycleEvent, RxHost, TxRequest};
use crate::fragment::Defrag;
use crate::frame::{
    capinfo, reason, Direction, Dot11Header, FrameType, MacAddr, MgmtSubtype, CTL_SUBTYPE_PS_POLL,
    FC0_VERSION_MASK, MIN_FRAME_LEN,
};
use crate::peers::{AuthState, PeerDescriptor, PeerId, PeerRole, PeerTable};
use crate::rates::negotiate;
use crate::scan::ScanEntry;
use crate::state::{IfaceState, NodeState, OpMode};
use crate::stats::{Counter, Stats};
use crate::{Dot11Error, Result, PROTOCOL_VERSION};

/// Receive metadata supplied by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMeta {
    pub rssi: i8,
    pub noise: i8,
    /// Receive timestamp
    pub rstamp: u64,
    /// The driver applied a key to a protected frame
    pub decrypted: bool,
}

/// Peer the driver attributed the frame to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxPeer {
    Known(PeerId),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Frames handed to the bridging layer
    Delivered(usize),
    /// Handled by a state machine
    Consumed,
    /// Fragment stored, waiting for the rest
    Pending,
    Discarded(Counter),
}

pub(crate) type Verdict = std::result::Result<RxOutcome, Counter>;

/// One frame on its way through the handlers
pub(crate) struct RxFrame<'a> {
    pub hdr: &'a Dot11Header,
    pub frame: &'a Bytes,
    pub meta: RxMeta,
}

impl<'a> RxFrame<'a> {
    /// Frame body after the MAC header
    pub fn body(&self) -> &'a [u8] {
        self.frame.get(self.hdr.len..).unwrap_or(&[])
    }

    pub fn sender(&self) -> MacAddr {
        self.hdr.addr2
    }
}

/// Resolved transmitter
#[derive(Debug, Clone)]
pub(crate) enum Sender {
    Unknown,
    Known(PeerId, Arc<PeerDescriptor>),
}

impl Sender {
    pub fn known(&self) -> Option<(PeerId, &Arc<PeerDescriptor>)> {
        match self {
            Sender::Known(id, peer) => Some((*id, peer)),
            Sender::Unknown => None,
        }
    }
}

/// Management handler selected for a role and subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MgmtAction {
    Beacon,
    ProbeReq,
    Auth,
    AssocReq { reassoc: bool },
    AssocResp { reassoc: bool },
    Deauth,
    Disassoc,
    /// Valid subtype the role has no use for
    Discard,
    /// Reserved subtype
    Unsupported,
}

/// Management dispatch table
pub fn mgmt_action(mode: OpMode, subtype: MgmtSubtype) -> MgmtAction {
    use MgmtAction as A;
    use OpMode as M;

    match subtype {
        MgmtSubtype::Beacon | MgmtSubtype::ProbeResp => match mode {
            M::Station | M::HostAp | M::AdHoc => A::Beacon,
            M::Monitor => A::Discard,
        },
        MgmtSubtype::ProbeReq => match mode {
            M::HostAp | M::AdHoc => A::ProbeReq,
            M::Station | M::Monitor => A::Discard,
        },
        MgmtSubtype::Auth => match mode {
            M::Station | M::HostAp => A::Auth,
            M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::AssocReq | MgmtSubtype::ReassocReq => match mode {
            M::HostAp => A::AssocReq {
                reassoc: subtype == MgmtSubtype::ReassocReq,
            },
            M::Station | M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::AssocResp | MgmtSubtype::ReassocResp => match mode {
            M::Station => A::AssocResp {
                reassoc: subtype == MgmtSubtype::ReassocResp,
            },
            M::HostAp | M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::Deauth => match mode {
            M::Station | M::HostAp => A::Deauth,
            M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::Disassoc => match mode {
            M::Station | M::HostAp => A::Disassoc,
            M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::Atim | MgmtSubtype::Action => match mode {
            M::Station | M::HostAp | M::AdHoc | M::Monitor => A::Discard,
        },
        MgmtSubtype::Reserved(_) => A::Unsupported,
    }
}

/// Receive engine for one interface
#[derive(Debug)]
pub struct RxEngine {
    pub(crate) config: EngineConfig,
    pub(crate) policy: LocalPolicy,
    pub(crate) iface: IfaceState,
    pub(crate) peers: Arc<PeerTable>,
    pub(crate) stats: Arc<Stats>,
}

impl RxEngine {
    /// Create an engine from a validated configuration.
    ///
    /// Access point and ad-hoc interfaces start running their own BSS, with
    /// a `Bss` descriptor standing for it. Stations start scanning.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let validation = ConfigManager::validate_config(&config)?;
        if !validation.valid {
            return Err(Dot11Error::Config(validation.errors.join(", ")));
        }
        for warning in &validation.warnings {
            log::warn!("Configuration: {}", warning);
        }

        let general = &config.general;
        let policy = config.policy();
        let peers = Arc::new(PeerTable::new(config.peers.max_peers));
        let mut iface = IfaceState::new(general.address, general.mode, general.phy);
        iface.bss.channel = general.channel;

        match general.mode {
            OpMode::HostAp | OpMode::AdHoc => {
                let bssid = config.own_bssid();
                let mut caps = if general.mode == OpMode::HostAp {
                    capinfo::ESS
                } else {
                    capinfo::IBSS
                };
                if config.security.privacy {
                    caps |= capinfo::PRIVACY;
                }

                let (id, peer) = peers.insert(bssid, PeerRole::Bss)?;
                {
                    let mut assoc = peer.assoc.lock();
                    assoc.rates = policy.rates.clone();
                    assoc.capinfo = caps;
                    assoc.auth = AuthState::Authenticated;
                    assoc.authorized = true;
                }

                iface.bss.bssid = bssid;
                iface.bss.ssid = config.bss.ssid.as_bytes().to_vec();
                iface.bss.capinfo = caps;
                iface.bss_peer = Some(id);
                iface.flags.ht = config.ht.enabled;
                iface.set_state(NodeState::Run);
            }
            OpMode::Station => {
                iface.set_state(NodeState::Scan);
            }
            OpMode::Monitor => {
                iface.set_state(NodeState::Run);
            }
        }

        log::info!(
            "Receive engine up: {} as {:?} on channel {}",
            general.address,
            general.mode,
            general.channel
        );

        Ok(Self {
            config,
            policy,
            iface,
            peers,
            stats: Arc::new(Stats::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn iface(&self) -> &IfaceState {
        &self.iface
    }

    pub fn state(&self) -> NodeState {
        self.iface.state
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// Apply a new configuration; mode and address are fixed for the
    /// lifetime of the engine.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<()> {
        if config.general.mode != self.config.general.mode
            || config.general.address != self.config.general.address
        {
            return Err(Dot11Error::InvalidParameter(
                "mode and address cannot change at runtime".to_string(),
            ));
        }
        let validation = ConfigManager::validate_config(&config)?;
        if !validation.valid {
            return Err(Dot11Error::Config(validation.errors.join(", ")));
        }

        self.policy = config.policy();
        self.iface.bss.channel = config.general.channel;
        self.config = config;
        log::info!("Receive engine reconfigured");
        Ok(())
    }

    pub fn set_channel(&mut self, channel: u8) {
        self.iface.bss.channel = channel;
    }

    /// Beacons and probe responses go to the scan collector while set
    pub fn set_scanning(&mut self, scanning: bool) {
        self.iface.flags.scanning = scanning;
    }

    /// Enter or leave local power save (station), announcing it to the AP
    pub fn set_power_save(&mut self, enable: bool, host: &mut dyn RxHost) {
        if self.iface.flags.power_save == enable {
            return;
        }
        self.iface.flags.power_save = enable;
        if self.iface.mode == OpMode::Station && self.iface.is_running() {
            host.send_null_data(self.iface.bss.bssid);
        }
    }

    /// Pick a BSS found by scanning
    pub fn join_bss(&mut self, entry: &ScanEntry) -> Result<PeerId> {
        if self.iface.mode != OpMode::Station {
            return Err(Dot11Error::InvalidParameter(
                "joining a BSS requires station mode".to_string(),
            ));
        }
        let rates = negotiate(&self.policy.rates.without_basic(), &entry.rates, self.policy.fixed_rate)
            .map_err(|rate| Dot11Error::InvalidParameter(format!("BSS rate {} unsupported", rate)))?;

        if let Some(old) = self.iface.bss_peer.take() {
            self.peers.remove(old);
        }
        let (id, peer) = self.peers.insert(entry.bssid, PeerRole::Bss)?;
        {
            let mut assoc = peer.assoc.lock();
            assoc.rates = rates;
            assoc.capinfo = entry.capinfo;
            assoc.bintval = entry.bintval;
            assoc.tstamp = entry.tstamp;
            assoc.erp = entry.erp.unwrap_or(0);
        }

        let bss = &mut self.iface.bss;
        bss.bssid = entry.bssid;
        bss.ssid = entry.ssid.clone();
        bss.channel = entry.channel;
        bss.capinfo = entry.capinfo;
        bss.bintval = entry.bintval;
        bss.tstamp = entry.tstamp;
        bss.erp = entry.erp.unwrap_or(0);
        bss.dtim_period = entry.dtim_period;
        bss.wme_param_count = None;
        bss.wme = None;
        bss.ht_cap = None;
        bss.ht_info = None;
        bss.rsn_ie = entry.rsn_ie.clone().map(Bytes::from);
        bss.wpa_ie = entry.wpa_ie.clone().map(Bytes::from);

        self.iface.bss_peer = Some(id);
        self.iface.associd = 0;
        self.iface.flags.protection =
            self.iface.is_11g() && self.iface.bss.erp & ERP_USE_PROTECTION != 0;

        log::info!(
            "Joining BSS {} \"{}\" on channel {}",
            entry.bssid,
            entry.ssid_lossy(),
            entry.channel
        );
        Ok(id)
    }

    /// Start authenticating with the joined BSS
    pub fn begin_auth(&mut self, host: &mut dyn RxHost) -> Result<()> {
        if self.iface.mode != OpMode::Station || !self.iface.joined() {
            return Err(Dot11Error::InvalidParameter(
                "authentication needs a joined BSS in station mode".to_string(),
            ));
        }
        self.new_state(NodeState::Auth, host);
        Ok(())
    }

    /// Open or close the 802.1X port of a peer
    pub fn authorize(&self, id: PeerId, authorized: bool) -> Result<()> {
        let peer = self
            .peers
            .get(id)
            .ok_or_else(|| Dot11Error::PeerNotFound(id.to_string()))?;
        peer.assoc.lock().authorized = authorized;
        log::debug!(
            "Port of {} {}",
            peer.address(),
            if authorized { "authorized" } else { "unauthorized" }
        );
        Ok(())
    }

    /// Process one received frame
    pub fn input(&mut self, frame: Bytes, meta: RxMeta, peer: RxPeer, host: &mut dyn RxHost) -> RxOutcome {
        match self.input_frame(&frame, meta, peer, host) {
            Ok(outcome) => outcome,
            Err(counter) => {
                self.stats.incr(counter);
                log::debug!("Discarded {}-byte frame: {:?}", frame.len(), counter);
                RxOutcome::Discarded(counter)
            }
        }
    }

    fn input_frame(&mut self, frame: &Bytes, meta: RxMeta, peer: RxPeer, host: &mut dyn RxHost) -> Verdict {
        if frame.len() < MIN_FRAME_LEN {
            return Err(Counter::TooShort);
        }
        if frame[0] & FC0_VERSION_MASK != PROTOCOL_VERSION {
            return Err(Counter::BadVersion);
        }
        let hdr = Dot11Header::parse(frame).map_err(|_| Counter::TooShort)?;

        if self.iface.mode == OpMode::Monitor {
            self.stats.incr(Counter::Monitor);
            return Ok(RxOutcome::Consumed);
        }

        let frame_type = hdr.frame_type();
        if frame_type == FrameType::Reserved {
            return Err(Counter::BadType);
        }
        if frame_type != FrameType::Control {
            self.check_direction(&hdr)?;
            self.check_bss(&hdr)?;
        }

        let sender = self.resolve_sender(&hdr, peer)?;
        if let Some((_, p)) = sender.known() {
            p.link
                .lock()
                .record_rx(frame.len(), meta.rssi, meta.noise, meta.rstamp);

            if frame_type != FrameType::Control {
                let fresh = p.rx.lock().seq.check(hdr.tid_index(), hdr.seq_ctl, hdr.retry());
                if !fresh {
                    p.link.lock().stats.rx_dup += 1;
                    return Err(Counter::Duplicate);
                }
            }
        }

        let rx = RxFrame {
            hdr: &hdr,
            frame,
            meta,
        };
        match frame_type {
            FrameType::Data => self.recv_data(&rx, &sender, host),
            FrameType::Management => self.recv_mgmt(&rx, &sender, host),
            FrameType::Control => self.recv_ctl(&rx, &sender, host),
            FrameType::Reserved => Err(Counter::BadType),
        }
    }

    fn check_direction(&self, hdr: &Dot11Header) -> std::result::Result<(), Counter> {
        let expected = match (hdr.frame_type(), self.iface.mode) {
            (FrameType::Data, OpMode::Station) => Direction::FromDs,
            (FrameType::Data, OpMode::HostAp) => Direction::ToDs,
            _ => Direction::NoDs,
        };
        if hdr.direction() != expected {
            return Err(Counter::WrongDirection);
        }
        Ok(())
    }

    fn check_bss(&self, hdr: &Dot11Header) -> std::result::Result<(), Counter> {
        // beacons and probe responses from other networks feed scanning
        if hdr.frame_type() == FrameType::Management
            && matches!(hdr.mgmt_subtype(), MgmtSubtype::Beacon | MgmtSubtype::ProbeResp)
        {
            return Ok(());
        }

        let ours = self.iface.bss.bssid;
        let matches = match self.iface.mode {
            OpMode::Station => !self.iface.joined() || hdr.addr2 == ours,
            OpMode::HostAp | OpMode::AdHoc => {
                let bssid = hdr.bssid();
                bssid == ours || bssid.is_broadcast()
            }
            OpMode::Monitor => true,
        };
        if !matches {
            return Err(Counter::WrongBss);
        }
        Ok(())
    }

    fn resolve_sender(&self, hdr: &Dot11Header, peer: RxPeer) -> std::result::Result<Sender, Counter> {
        let resolved = match peer {
            RxPeer::Known(id) => self.peers.get(id).map(|p| (id, p)),
            RxPeer::Unknown => self.peers.find(&hdr.addr2),
        };

        let sender = match resolved {
            Some((_, p)) if p.role() == PeerRole::Bss && self.iface.mode != OpMode::Station => Sender::Unknown,
            Some((id, p)) => Sender::Known(id, p),
            None => Sender::Unknown,
        };

        if matches!(sender, Sender::Unknown)
            && self.iface.mode == OpMode::AdHoc
            && hdr.frame_type() == FrameType::Data
        {
            let (id, p) = self.add_neighbor(hdr.addr2)?;
            return Ok(Sender::Known(id, p));
        }
        Ok(sender)
    }

    /// Minimal descriptor for an ad-hoc neighbor
    pub(crate) fn add_neighbor(&self, addr: MacAddr) -> std::result::Result<(PeerId, Arc<PeerDescriptor>), Counter> {
        let (id, peer) = self
            .peers
            .insert(addr, PeerRole::Neighbor)
            .map_err(|err| {
                log::warn!("Cannot add neighbor {}: {}", addr, err);
                Counter::NoResources
            })?;
        {
            let mut assoc = peer.assoc.lock();
            assoc.auth = AuthState::Authenticated;
            assoc.authorized = true;
            if assoc.rates.is_empty() {
                assoc.rates = self.policy.rates.clone();
            }
        }
        log::debug!("Neighbor {} added to the IBSS", addr);
        Ok((id, peer))
    }

    fn recv_data(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let hdr = rx.hdr;

        match self.iface.mode {
            OpMode::Station => {
                if hdr.addr1.is_group() && hdr.addr3 == self.iface.address {
                    return Err(Counter::McastEcho);
                }
            }
            OpMode::HostAp => match sender.known() {
                None => {
                    if !hdr.addr2.is_group() {
                        host.send_mgmt(TxRequest::deauth(hdr.addr2, None, reason::NOT_AUTHED));
                    }
                    return Err(Counter::NotAssociated);
                }
                Some((id, peer)) => {
                    if peer.associd() == 0 {
                        host.send_mgmt(TxRequest::disassoc(hdr.addr2, Some(id), reason::NOT_ASSOCED));
                        return Err(Counter::NotAssociated);
                    }
                    self.track_power_save(id, peer, hdr.pwr_mgt(), host);
                }
            },
            OpMode::AdHoc | OpMode::Monitor => {}
        }

        if hdr.is_null_data() {
            return Err(Counter::NoData);
        }
        if hdr.protected() {
            if !self.config.security.privacy {
                return Err(Counter::NoPrivacy);
            }
            if !rx.meta.decrypted {
                return Err(Counter::DecryptFailed);
            }
        }

        let Some((id, peer)) = sender.known() else {
            return Err(Counter::NotAssociated);
        };
        peer.link.lock().stats.rx_data += 1;

        let defrag = peer.rx.lock().frag.push(hdr, rx.frame.clone());
        let frame = match defrag {
            Defrag::Complete(frame) => frame,
            Defrag::Pending => return Ok(RxOutcome::Pending),
            Defrag::Dropped => return Err(Counter::Defrag),
        };

        self.deliver_data(frame, id, peer, rx.meta, host)
    }

    fn recv_mgmt(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let hdr = rx.hdr;
        let subtype = hdr.mgmt_subtype();
        if let Some((_, peer)) = sender.known() {
            peer.link.lock().stats.rx_mgmt += 1;
        }

        if hdr.protected() {
            if subtype != MgmtSubtype::Auth {
                return Err(Counter::MgmtDiscard);
            }
            if !self.config.security.privacy {
                return Err(Counter::NoPrivacy);
            }
            if !rx.meta.decrypted {
                return Err(Counter::DecryptFailed);
            }
        }

        match mgmt_action(self.iface.mode, subtype) {
            MgmtAction::Beacon => self.recv_beacon(rx, sender, host),
            MgmtAction::ProbeReq => self.recv_probe_req(rx, host),
            MgmtAction::Auth => self.recv_auth(rx, sender, host),
            MgmtAction::AssocReq { reassoc } => self.recv_assoc_req(rx, sender, reassoc, host),
            MgmtAction::AssocResp { reassoc } => self.recv_assoc_resp(rx, sender, reassoc, host),
            MgmtAction::Deauth => self.recv_deauth(rx, sender, host),
            MgmtAction::Disassoc => self.recv_disassoc(rx, sender, host),
            MgmtAction::Discard => Err(Counter::MgmtDiscard),
            MgmtAction::Unsupported => Err(Counter::BadSubtype),
        }
    }

    fn recv_ctl(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        if let Some((_, peer)) = sender.known() {
            peer.link.lock().stats.rx_ctrl += 1;
        }
        if self.iface.mode == OpMode::HostAp && rx.hdr.subtype() == CTL_SUBTYPE_PS_POLL {
            return self.recv_ps_poll(rx, sender, host);
        }
        Err(Counter::Control)
    }

    /// Move the state machine and, as a station, send what the new state
    /// starts with.
    pub(crate) fn new_state(&mut self, to: NodeState, host: &mut dyn RxHost) {
        let from = self.iface.set_state(to);
        if from != to {
            host.notify(LifecycleEvent::StateChange { from, to });
        }
        if self.iface.mode != OpMode::Station {
            return;
        }

        let bssid = self.iface.bss.bssid;
        let bss_peer = self.iface.bss_peer;
        match to {
            NodeState::Auth => {
                if let Some(peer) = bss_peer.and_then(|id| self.peers.get(id)) {
                    let mut assoc = peer.assoc.lock();
                    assoc.auth = AuthState::OpenPending;
                    assoc.challenge = None;
                }
                host.send_mgmt(TxRequest::auth(bssid, bss_peer, 1, 0));
            }
            NodeState::Assoc => {
                let subtype = if from == NodeState::Run {
                    MgmtSubtype::ReassocReq
                } else {
                    MgmtSubtype::AssocReq
                };
                host.send_mgmt(TxRequest::new(bssid, subtype, 0, bss_peer));
            }
            NodeState::Init | NodeState::Scan | NodeState::Run => {}
        }
    }

    pub(crate) fn return_to_discovery(&mut self, reason: DiscoveryReason, host: &mut dyn RxHost) {
        let bssid = self.iface.bss.bssid;
        log::info!("Leaving BSS {}: {:?}", bssid, reason);
        self.new_state(NodeState::Scan, host);
        host.notify(LifecycleEvent::ReturnToDiscovery { bssid, reason });
    }

    /// The port opens at association unless 802.1X or WPA key management
    /// is in charge of it.
    pub(crate) fn port_open_on_join(&self) -> bool {
        self.policy.security.is_none()
            && !matches!(self.config.security.auth_mode, AuthMode::Dot1x | AuthMode::Wpa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Outbound;
    use crate::frame::FC1_PROTECTED;
    use crate::test_utils::*;

    #[test]
    fn test_dispatch_table() {
        assert_eq!(mgmt_action(OpMode::Station, MgmtSubtype::Beacon), MgmtAction::Beacon);
        assert_eq!(mgmt_action(OpMode::Station, MgmtSubtype::ProbeReq), MgmtAction::Discard);
        assert_eq!(mgmt_action(OpMode::HostAp, MgmtSubtype::ProbeReq), MgmtAction::ProbeReq);
        assert_eq!(
            mgmt_action(OpMode::HostAp, MgmtSubtype::ReassocReq),
            MgmtAction::AssocReq { reassoc: true }
        );
        assert_eq!(mgmt_action(OpMode::HostAp, MgmtSubtype::AssocResp), MgmtAction::Discard);
        assert_eq!(mgmt_action(OpMode::AdHoc, MgmtSubtype::Auth), MgmtAction::Discard);
        assert_eq!(mgmt_action(OpMode::Monitor, MgmtSubtype::Beacon), MgmtAction::Discard);
        assert_eq!(
            mgmt_action(OpMode::HostAp, MgmtSubtype::Reserved(0x0f)),
            MgmtAction::Unsupported
        );
    }

    #[test]
    fn test_join_bss_takes_protection_from_erp() {
        let mut engine = sta_engine();
        let mut entry = scan_entry(ap_addr());
        entry.erp = Some(ERP_USE_PROTECTION);

        let bss = engine.join_bss(&entry).unwrap();
        assert_eq!(engine.iface().bss_peer, Some(bss));
        assert_eq!(engine.iface().bss.erp, ERP_USE_PROTECTION);
        assert!(engine.iface().flags.protection);
        assert_eq!(engine.peers().get(bss).unwrap().assoc.lock().erp, ERP_USE_PROTECTION);

        entry.erp = None;
        engine.join_bss(&entry).unwrap();
        assert!(!engine.iface().flags.protection);
    }

    #[test]
    fn test_short_and_bad_version() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let outcome = engine.input(Bytes::from_static(&[0u8; 10]), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::TooShort));

        let mut frame = mgmt_frame(MgmtSubtype::ProbeReq, MacAddr::BROADCAST, sta_addr(), MacAddr::BROADCAST, &[]);
        frame[0] |= 0x01;
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::BadVersion));

        // data header cut short of its 24 bytes
        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr()).build(&[]);
        let outcome = engine.input(Bytes::copy_from_slice(&frame[..20]), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::TooShort));

        assert_eq!(engine.stats().get(Counter::TooShort), 2);
        assert!(host.is_empty());
    }

    #[test]
    fn test_monitor_counts_only() {
        let mut config = test_config(OpMode::Monitor);
        config.general.channel = 1;
        let mut engine = RxEngine::new(config).unwrap();
        let mut host: Vec<Outbound> = Vec::new();

        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, ap_addr(), ap_addr(), &[]);
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Consumed);
        assert_eq!(engine.stats().get(Counter::Monitor), 1);
        assert!(host.is_empty());
    }

    #[test]
    fn test_wrong_direction() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let frame = DataFrameBuilder::new(Direction::FromDs, sta_addr(), ap_addr(), other_addr()).build(b"x");
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::WrongDirection));

        let mut frame = mgmt_frame(MgmtSubtype::Auth, ap_addr(), sta_addr(), ap_addr(), &auth_body(0, 1, 0, &[]));
        frame[1] |= 0x01;
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::WrongDirection));
    }

    #[test]
    fn test_wrong_bss() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let foreign = MacAddr([0x02, 0, 0, 0, 0x77, 0x77]);
        let frame = mgmt_frame(MgmtSubtype::Auth, foreign, sta_addr(), foreign, &auth_body(0, 1, 0, &[]));
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::WrongBss));
        assert!(host.is_empty());
    }

    #[test]
    fn test_unknown_data_sender_is_deauthenticated() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .build(&snap_payload(0x0800, b"ping"));
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NotAssociated));

        let sent = mgmt_sent(&host);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subtype, MgmtSubtype::Deauth);
        assert_eq!(sent[0].status(), reason::NOT_AUTHED);
    }

    #[test]
    fn test_authenticated_but_unassociated_gets_disassoc() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let (id, _) = engine.peers().insert(sta_addr(), PeerRole::Station).unwrap();

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr()).build(b"data");
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(id), &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NotAssociated));
        assert_eq!(mgmt_sent(&host)[0].subtype, MgmtSubtype::Disassoc);
        assert_eq!(mgmt_sent(&host)[0].status(), reason::NOT_ASSOCED);
    }

    #[test]
    fn test_retried_duplicate_is_dropped() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = associate_station(&mut engine, sta_addr());

        let payload = snap_payload(0x0800, b"hello");
        let first = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .seq(100, 0)
            .build(&payload);
        let retry = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .seq(100, 0)
            .retry()
            .build(&payload);

        assert_eq!(
            engine.input(Bytes::from(first), meta(), RxPeer::Known(id), &mut host),
            RxOutcome::Delivered(1)
        );
        assert_eq!(
            engine.input(Bytes::from(retry), meta(), RxPeer::Known(id), &mut host),
            RxOutcome::Discarded(Counter::Duplicate)
        );
        assert_eq!(delivered(&host).len(), 1);
        let peer = engine.peers().get(id).unwrap();
        assert_eq!(peer.link.lock().stats.rx_dup, 1);
    }

    #[test]
    fn test_protected_data_checks() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = associate_station(&mut engine, sta_addr());

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .protected()
            .build(b"ciphertext");
        let outcome = engine.input(Bytes::from(frame.clone()), meta(), RxPeer::Known(id), &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NoPrivacy));

        let mut config = engine.config().clone();
        config.security.privacy = true;
        engine.reconfigure(config).unwrap();

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .seq(2, 0)
            .protected()
            .build(b"ciphertext");
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(id), &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::DecryptFailed));
    }

    #[test]
    fn test_protected_mgmt_only_for_auth() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let frame = mgmt_frame_fc1(
            MgmtSubtype::ProbeReq,
            MacAddr::BROADCAST,
            sta_addr(),
            MacAddr::BROADCAST,
            FC1_PROTECTED,
            &[],
        );
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::MgmtDiscard));

        let frame = mgmt_frame_fc1(
            MgmtSubtype::Auth,
            ap_addr(),
            sta_addr(),
            ap_addr(),
            FC1_PROTECTED,
            &auth_body(1, 3, 0, &[]),
        );
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NoPrivacy));
    }

    #[test]
    fn test_null_data_stops_after_power_save_tracking() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = associate_station(&mut engine, sta_addr());

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), ap_addr())
            .null()
            .pwr_mgt()
            .build(&[]);
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(id), &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NoData));
        assert!(engine.peers().get(id).unwrap().in_power_save());
    }

    #[test]
    fn test_station_drops_own_multicast_echo() {
        let (mut engine, bss) = running_station();
        let mut host: Vec<Outbound> = Vec::new();

        let frame = DataFrameBuilder::new(Direction::FromDs, MacAddr::BROADCAST, ap_addr(), sta_addr())
            .build(&snap_payload(0x0800, b"arp"));
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(bss), &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::McastEcho));
    }

    #[test]
    fn test_adhoc_synthesizes_neighbor() {
        let mut engine = adhoc_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let bssid = engine.iface().bss.bssid;

        let frame = DataFrameBuilder::new(Direction::NoDs, ap_addr(), other_addr(), bssid)
            .build(&snap_payload(0x0800, b"hi"));
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Delivered(1));

        let (_, neighbor) = engine.peers().find(&other_addr()).unwrap();
        assert_eq!(neighbor.role(), PeerRole::Neighbor);
        assert!(neighbor.is_authorized());
    }

    #[test]
    fn test_adhoc_neighbor_table_full() {
        let mut config = test_config(OpMode::AdHoc);
        config.peers.max_peers = 1;
        let mut engine = RxEngine::new(config).unwrap();
        let mut host: Vec<Outbound> = Vec::new();
        let bssid = engine.iface().bss.bssid;

        let frame = DataFrameBuilder::new(Direction::NoDs, ap_addr(), other_addr(), bssid).build(b"x");
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::NoResources));
    }

    #[test]
    fn test_control_frames_counted() {
        let mut engine = running_station().0;
        let mut host: Vec<Outbound> = Vec::new();

        let frame = ps_poll(1, ap_addr(), sta_addr());
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Discarded(Counter::Control));
    }

    #[test]
    fn test_signal_metrics_recorded() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = associate_station(&mut engine, sta_addr());

        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .build(&snap_payload(0x0800, b"x"));
        let rx_meta = RxMeta {
            rssi: -42,
            noise: -95,
            rstamp: 77,
            decrypted: false,
        };
        engine.input(Bytes::from(frame), rx_meta, RxPeer::Known(id), &mut host);

        let peer = engine.peers().get(id).unwrap();
        let link = peer.link.lock();
        assert_eq!(link.rssi, -42);
        assert_eq!(link.noise, -95);
        assert_eq!(link.rstamp, 77);
    }

    #[test]
    fn test_reconfigure_rejects_mode_change() {
        let mut engine = ap_engine();
        let mut config = engine.config().clone();
        config.general.mode = OpMode::Station;
        assert!(engine.reconfigure(config).is_err());
    }
}
