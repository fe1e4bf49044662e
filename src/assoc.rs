//! Association
//!
//! Access point side: probe, (re)association requests and departures.
//! Station side: association responses and being told to leave.

use bytes::Bytes;
use std::sync::Arc;

use crate::decap::l2_update_frame;
use crate::element::{walk, AthCaps, Element, ElementKind, ERP_USE_PROTECTION};
use crate::event::{DiscoveryReason, LifecycleEvent, RxHost, TxRequest};
use crate::frame::{capinfo, reason, status, MacAddr, MgmtSubtype};
use crate::input::{RxEngine, RxFrame, RxOutcome, Sender, Verdict};
use crate::peers::{AuthState, PeerId, PeerRole};
use crate::rates::{negotiate, negotiate_mcs, HtCapabilities, HtInfo, RateSet, PUREG_MIN_RATE, RATE_MAXSIZE};
use crate::scan::{WmeParams, NWID_LEN};
use crate::security::{parse_rsn, parse_wpa, RsnParams, SecurityError, SecurityIe};
use crate::state::{NodeState, OpMode, PhyMode};
use crate::stats::Counter;

/// Capability and listen interval
pub const ASSOC_REQ_FIXED_LEN: usize = 4;
/// Capability, listen interval and current AP
pub const REASSOC_REQ_FIXED_LEN: usize = 10;
/// Capability, status and association id
pub const ASSOC_RESP_FIXED_LEN: usize = 6;
/// The two high bits of an association id field are always set
pub const AID_MASK: u16 = 0x3fff;

/// Elements a probe or association frame may carry
#[derive(Debug, Default)]
struct MgmtElements<'a> {
    ssid: Option<&'a [u8]>,
    rates: Option<&'a [u8]>,
    xrates: Option<&'a [u8]>,
    rsn: Option<Element<'a>>,
    wpa: Option<Element<'a>>,
    wme: Option<Element<'a>>,
    ath: Option<Element<'a>>,
    htcap: Option<&'a [u8]>,
    htinfo: Option<&'a [u8]>,
}

impl<'a> MgmtElements<'a> {
    fn parse(buf: &'a [u8], ht_compat: bool) -> Result<Self, Counter> {
        let mut elements = Self::default();
        for element in walk(buf) {
            let element = element.map_err(|_| Counter::TooShort)?;
            match element.kind {
                ElementKind::Ssid => elements.ssid = Some(element.data),
                ElementKind::Rates => elements.rates = Some(element.data),
                ElementKind::ExtRates => elements.xrates = Some(element.data),
                ElementKind::Rsn => elements.rsn = Some(element),
                ElementKind::Wpa => elements.wpa = Some(element),
                ElementKind::WmeInfo | ElementKind::WmeParam => elements.wme = Some(element),
                ElementKind::Atheros => elements.ath = Some(element),
                ElementKind::HtCap => elements.htcap = Some(element.data),
                ElementKind::HtInfo => elements.htinfo = Some(element.data),
                ElementKind::VendorHtCap if ht_compat => {
                    elements.htcap = elements.htcap.or(Some(element.vendor_payload()));
                }
                ElementKind::VendorHtInfo if ht_compat => {
                    elements.htinfo = elements.htinfo.or(Some(element.vendor_payload()));
                }
                _ => {}
            }
        }
        Ok(elements)
    }

    /// SSID and combined rate set, both mandatory
    fn required(&self) -> Result<(&'a [u8], RateSet), Counter> {
        let rates = self.rates.ok_or(Counter::ElementMissing)?;
        if rates.len() > RATE_MAXSIZE {
            return Err(Counter::ElementTooBig);
        }
        let ssid = self.ssid.ok_or(Counter::ElementMissing)?;
        if ssid.len() > NWID_LEN {
            return Err(Counter::ElementTooBig);
        }
        if self.xrates.map_or(false, |x| x.len() > RATE_MAXSIZE - rates.len()) {
            return Err(Counter::ElementTooBig);
        }
        Ok((ssid, RateSet::from_elements(rates, self.xrates)))
    }

    fn ht_capabilities(&self) -> Option<HtCapabilities> {
        self.htcap.and_then(HtCapabilities::parse)
    }
}

fn request_kind(reassoc: bool) -> &'static str {
    if reassoc {
        "reassociation"
    } else {
        "association"
    }
}

fn reason_code(body: &[u8]) -> Result<u16, Counter> {
    match body {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(Counter::TooShort),
    }
}

impl RxEngine {
    pub(crate) fn recv_probe_req(&mut self, rx: &RxFrame<'_>, host: &mut dyn RxHost) -> Verdict {
        let addr = rx.sender();
        if self.iface.state != NodeState::Run || addr.is_group() {
            return Err(Counter::MgmtDiscard);
        }

        let elements = MgmtElements::parse(rx.body(), self.config.ht.compat)?;
        let (ssid, offered) = elements.required()?;
        if ssid.is_empty() {
            if self.config.bss.hide_ssid {
                return Err(Counter::SsidMismatch);
            }
        } else if ssid != self.iface.bss.ssid.as_slice() {
            return Err(Counter::SsidMismatch);
        }

        // our own basic rates are not enforced on a probe
        if let Err(rate) = negotiate(&self.policy.rates.without_basic(), &offered, self.policy.fixed_rate) {
            log::debug!("Probe from {} offers unsupported basic rate {}", addr, rate);
            return Err(Counter::RateMismatch);
        }

        host.send_mgmt(TxRequest::new(addr, MgmtSubtype::ProbeResp, 0, None));
        Ok(RxOutcome::Consumed)
    }

    pub(crate) fn recv_assoc_req(
        &mut self,
        rx: &RxFrame<'_>,
        sender: &Sender,
        reassoc: bool,
        host: &mut dyn RxHost,
    ) -> Verdict {
        let addr = rx.sender();
        if self.iface.state != NodeState::Run {
            return Err(Counter::MgmtDiscard);
        }
        if rx.hdr.addr3 != self.iface.bss.bssid {
            return Err(Counter::WrongBss);
        }

        let body = rx.body();
        let fixed = if reassoc {
            REASSOC_REQ_FIXED_LEN
        } else {
            ASSOC_REQ_FIXED_LEN
        };
        if body.len() < fixed {
            return Err(Counter::TooShort);
        }
        let caps = u16::from_le_bytes([body[0], body[1]]);
        let listen_interval = u16::from_le_bytes([body[2], body[3]]);

        let elements = MgmtElements::parse(&body[fixed..], self.config.ht.compat)?;
        let (ssid, offered) = elements.required()?;
        if !ssid.is_empty() && ssid != self.iface.bss.ssid.as_slice() {
            return Err(Counter::SsidMismatch);
        }

        let (id, peer) = match sender.known() {
            Some((id, peer)) if peer.assoc.lock().auth == AuthState::Authenticated => (id, Arc::clone(peer)),
            known => {
                log::debug!("Deny {} from {}: not authenticated", request_kind(reassoc), addr);
                host.send_mgmt(TxRequest::deauth(
                    addr,
                    known.map(|(id, _)| id),
                    reason::ASSOC_NOT_AUTHED,
                ));
                return Err(Counter::AssocNotAuth);
            }
        };

        let security = match self.negotiate_security(&elements) {
            Ok(security) => security,
            Err(err) => {
                log::info!("Deny {} from {}: {}", request_kind(reassoc), addr, err);
                host.send_mgmt(TxRequest::deauth(addr, Some(id), err.reason_code()));
                self.node_leave(id, err.reason_code(), host);
                return Err(Counter::BadWpaIe);
            }
        };

        let slot_changed = {
            let assoc = peer.assoc.lock();
            assoc.associd != 0 && (assoc.capinfo ^ caps) & capinfo::SHORT_SLOTTIME != 0
        };
        if caps & capinfo::ESS == 0 || (self.iface.is_11g() && slot_changed) {
            return self.refuse_assoc(addr, id, reassoc, status::CAPINFO, Counter::CapMismatch, host);
        }

        let rates = match negotiate(&self.policy.rates, &offered, self.policy.fixed_rate) {
            Ok(rates) => rates,
            Err(rate) => {
                log::debug!("Station {} lacks rate {}", addr, rate);
                return self.refuse_assoc(addr, id, reassoc, status::BASIC_RATE, Counter::AssocNoRate, host);
            }
        };
        if self.config.rates.pure_g && self.iface.is_11g() && rates.max_rate() < PUREG_MIN_RATE {
            return self.refuse_assoc(addr, id, reassoc, status::BASIC_RATE, Counter::AssocNoRate, host);
        }

        let ht = elements.ht_capabilities().filter(|_| self.config.ht.enabled);
        let mcs = match ht {
            Some(cap) => match negotiate_mcs(&self.policy.mcs, &cap.mcs, &self.policy.basic_mcs) {
                Ok(mcs) => Some(mcs),
                Err(index) => {
                    log::debug!("Station {} lacks MCS {}", addr, index);
                    return self.refuse_assoc(addr, id, reassoc, status::BASIC_RATE, Counter::HtNoRate, host);
                }
            },
            None if self.config.ht.pure_n => {
                return self.refuse_assoc(addr, id, reassoc, status::NO_HT, Counter::HtRequired, host);
            }
            None => None,
        };

        let aid = match peer.associd() {
            0 => match self.peers.alloc_aid() {
                Some(aid) => aid,
                None => {
                    return self.refuse_assoc(addr, id, reassoc, status::TOOMANY, Counter::AssocTooMany, host);
                }
            },
            aid => aid,
        };

        let authorized = self.port_open_on_join();
        {
            let mut assoc = peer.assoc.lock();
            assoc.associd = aid;
            assoc.capinfo = caps;
            assoc.listen_interval = listen_interval;
            assoc.rates = rates;
            assoc.ht = ht;
            assoc.mcs = mcs;
            assoc.qos = elements.wme.is_some();
            assoc.ath_caps = elements.ath.as_ref().and_then(AthCaps::parse);
            assoc.challenge = None;
            assoc.authorized = authorized;
            match security {
                Some((params, ie)) => {
                    assoc.rsn = Some(params);
                    assoc.security_ie = Some(ie);
                }
                None => {
                    assoc.rsn = None;
                    assoc.security_ie = None;
                }
            }
        }

        log::info!("Station {} joined by {}, aid {}", addr, request_kind(reassoc), aid);
        self.send_assoc_resp(addr, id, reassoc, status::SUCCESS, host);
        host.notify(LifecycleEvent::Join {
            addr,
            peer: id,
            aid,
            reassoc,
        });
        host.deliver(l2_update_frame(addr));
        Ok(RxOutcome::Consumed)
    }

    /// Negotiate the WPA or RSN element of a request; RSN wins when both
    /// are present.
    fn negotiate_security(
        &self,
        elements: &MgmtElements<'_>,
    ) -> Result<Option<(RsnParams, Bytes)>, SecurityError> {
        let policy = self.policy.security.as_ref();
        let (element, params) = match (elements.rsn, elements.wpa, policy) {
            (Some(rsn), _, Some(policy)) => (rsn, parse_rsn(rsn.data, policy)?),
            (None, Some(wpa), Some(policy)) => (wpa, parse_wpa(wpa.data, policy)?),
            (Some(_), _, None) => return Err(SecurityError::NotEnabled(SecurityIe::Rsn)),
            (None, Some(_), None) => return Err(SecurityError::NotEnabled(SecurityIe::Wpa)),
            (None, None, Some(_)) => return Err(SecurityError::Missing),
            (None, None, None) => return Ok(None),
        };
        Ok(Some((params, Bytes::copy_from_slice(element.raw))))
    }

    fn send_assoc_resp(&self, addr: MacAddr, id: PeerId, reassoc: bool, code: u16, host: &mut dyn RxHost) {
        let subtype = if reassoc {
            MgmtSubtype::ReassocResp
        } else {
            MgmtSubtype::AssocResp
        };
        host.send_mgmt(TxRequest::new(addr, subtype, code as u32, Some(id)));
    }

    /// Answer with a failure status and forget the station
    fn refuse_assoc(
        &self,
        addr: MacAddr,
        id: PeerId,
        reassoc: bool,
        code: u16,
        counter: Counter,
        host: &mut dyn RxHost,
    ) -> Verdict {
        log::info!("Deny {} from {}: status {} ({:?})", request_kind(reassoc), addr, code, counter);
        self.send_assoc_resp(addr, id, reassoc, code, host);
        self.node_leave(id, reason::UNSPECIFIED, host);
        Err(counter)
    }

    pub(crate) fn recv_assoc_resp(
        &mut self,
        rx: &RxFrame<'_>,
        sender: &Sender,
        reassoc: bool,
        host: &mut dyn RxHost,
    ) -> Verdict {
        if self.iface.state != NodeState::Assoc {
            return Err(Counter::MgmtDiscard);
        }
        let Some((_, peer)) = sender.known() else {
            return Err(Counter::MgmtDiscard);
        };

        let body = rx.body();
        if body.len() < ASSOC_RESP_FIXED_LEN {
            return Err(Counter::TooShort);
        }
        let caps = u16::from_le_bytes([body[0], body[1]]);
        let code = u16::from_le_bytes([body[2], body[3]]);
        let aid = u16::from_le_bytes([body[4], body[5]]) & AID_MASK;

        let bssid = self.iface.bss.bssid;
        if code != status::SUCCESS {
            peer.assoc.lock().fails += 1;
            log::info!("{} with {} refused: status {}", request_kind(reassoc), bssid, code);
            return Err(Counter::AssocFail);
        }

        let elements = MgmtElements::parse(&body[ASSOC_RESP_FIXED_LEN..], self.config.ht.compat)?;
        let offered = RateSet::from_elements(elements.rates.ok_or(Counter::ElementMissing)?, elements.xrates);

        let rates = match negotiate(&self.policy.rates.without_basic(), &offered, self.policy.fixed_rate) {
            Ok(rates) => rates,
            Err(rate) => {
                log::info!("BSS {} requires unsupported rate {}", bssid, rate);
                self.return_to_discovery(DiscoveryReason::RatesUnsupported, host);
                return Err(Counter::AssocNoRate);
            }
        };

        let wme = elements
            .wme
            .filter(|e| e.kind == ElementKind::WmeParam)
            .and_then(|e| WmeParams::parse(e.data).map(|params| (params, WmeParams::param_count(e.data))));
        let ht = if self.config.ht.enabled {
            match (elements.ht_capabilities(), elements.htinfo.and_then(HtInfo::parse)) {
                (Some(cap), Some(info)) => Some((cap, info)),
                _ => None,
            }
        } else {
            None
        };
        let authorized = self.port_open_on_join();

        {
            let mut assoc = peer.assoc.lock();
            assoc.associd = aid;
            assoc.capinfo = caps;
            assoc.rates = rates;
            assoc.ht = ht.map(|(cap, _)| cap);
            assoc.qos = wme.is_some();
            assoc.authorized = authorized;
        }

        let iface = &mut self.iface;
        iface.associd = aid;
        iface.bss.capinfo = caps;
        iface.flags.short_preamble = caps & capinfo::SHORT_PREAMBLE != 0;
        iface.flags.short_slot = iface.phy == PhyMode::Dot11a || caps & capinfo::SHORT_SLOTTIME != 0;
        iface.flags.protection = iface.is_11g() && iface.bss.erp & ERP_USE_PROTECTION != 0;
        iface.flags.qos = wme.is_some();
        iface.bss.wme = wme.map(|(params, _)| params);
        iface.bss.wme_param_count = wme.and_then(|(_, count)| count);
        iface.flags.ht = ht.is_some();
        iface.bss.ht_cap = ht.map(|(cap, _)| cap);
        iface.bss.ht_info = ht.map(|(_, info)| info);

        log::info!("Associated with {} as aid {}", bssid, aid);
        self.new_state(NodeState::Run, host);
        host.notify(LifecycleEvent::EnterRunning { bssid, aid });
        Ok(RxOutcome::Consumed)
    }

    pub(crate) fn recv_deauth(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let code = reason_code(rx.body())?;
        if rx.hdr.addr1 != self.iface.address {
            return Err(Counter::MgmtDiscard);
        }
        self.stats.incr(Counter::Deauth);
        if let Some((_, peer)) = sender.known() {
            peer.link.lock().stats.rx_deauth += 1;
        }
        log::info!("Deauthenticated by {}: reason {}", rx.sender(), code);

        match self.iface.mode {
            OpMode::Station => {
                if matches!(self.iface.state, NodeState::Auth | NodeState::Assoc | NodeState::Run) {
                    self.iface.associd = 0;
                    if let Some((_, peer)) = sender.known() {
                        let mut assoc = peer.assoc.lock();
                        assoc.associd = 0;
                        assoc.auth = AuthState::Unauthenticated;
                    }
                    self.new_state(NodeState::Auth, host);
                }
            }
            OpMode::HostAp => {
                if let Some((id, _)) = sender.known() {
                    self.node_leave(id, code, host);
                }
            }
            OpMode::AdHoc | OpMode::Monitor => {}
        }
        Ok(RxOutcome::Consumed)
    }

    pub(crate) fn recv_disassoc(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let code = reason_code(rx.body())?;
        if rx.hdr.addr1 != self.iface.address {
            return Err(Counter::MgmtDiscard);
        }
        self.stats.incr(Counter::Disassoc);
        if let Some((_, peer)) = sender.known() {
            peer.link.lock().stats.rx_disassoc += 1;
        }
        log::info!("Disassociated by {}: reason {}", rx.sender(), code);

        match self.iface.mode {
            OpMode::Station => {
                if self.iface.state == NodeState::Run {
                    self.new_state(NodeState::Assoc, host);
                }
            }
            OpMode::HostAp => {
                if let Some((id, _)) = sender.known() {
                    self.node_leave(id, code, host);
                }
            }
            OpMode::AdHoc | OpMode::Monitor => {}
        }
        Ok(RxOutcome::Consumed)
    }

    /// Drop a station: release its association id, power-save state and
    /// descriptor. `reason` is reported in the leave event.
    pub fn node_leave(&self, id: PeerId, reason: u16, host: &mut dyn RxHost) {
        let Some(peer) = self.peers.get(id) else {
            return;
        };
        if peer.role() == PeerRole::Bss {
            return;
        }

        let aid = {
            let mut assoc = peer.assoc.lock();
            let aid = assoc.associd;
            assoc.associd = 0;
            assoc.authorized = false;
            assoc.auth = AuthState::Unauthenticated;
            aid
        };
        {
            let mut ps = peer.ps.lock();
            if !ps.queue.is_empty() {
                log::debug!("Dropping {} buffered frames for {}", ps.queue.len(), peer.address());
                peer.link.lock().stats.ps_dropped += ps.queue.len() as u64;
                ps.queue.clear();
            }
            ps.power_save = false;
            if ps.tim && aid != 0 {
                host.set_tim(aid, false);
            }
            ps.tim = false;
        }

        if aid != 0 {
            self.peers.free_aid(aid);
            host.notify(LifecycleEvent::Leave {
                addr: peer.address(),
                aid,
                reason,
            });
        }
        self.peers.remove(id);
        log::info!("Station {} left (reason {})", peer.address(), reason);
    }
}
