//! Beacon and probe response processing
//!
//! [`ScanParams`] holds everything extracted from a beacon or probe
//! response body. While scanning each valid frame becomes a [`ScanEntry`]
//! for the collector; otherwise a station tracks the parameters of the BSS
//! it runs in and an ad-hoc node learns its neighbors.

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::element::{walk, Element, ElementKind, ERP_USE_PROTECTION};
use crate::event::RxHost;
use crate::frame::{capinfo, Dot11Header, MacAddr, MgmtSubtype};
use crate::input::{RxEngine, RxFrame, RxMeta, RxOutcome, Sender, Verdict};
use crate::peers::PeerDescriptor;
use crate::rates::{HtCapabilities, HtInfo, RateSet, RATE_MAXSIZE};
use crate::state::{OpMode, PhyMode};
use crate::stats::{Counter, Stats};

/// Timestamp, beacon interval and capability
pub const FIXED_LEN: usize = 12;
/// Longest SSID
pub const NWID_LEN: usize = 32;
/// Accepted beacon interval range in TU
pub const BINTVAL_MIN: u16 = 25;
pub const BINTVAL_MAX: u16 = 1000;

/// WME parameter element data, OUI included
pub const WME_PARAM_LEN: usize = 24;
pub const WME_NUM_AC: usize = 4;
const WME_QOSINFO_COUNT: u8 = 0x0f;

/// EDCA parameters of one access category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcParams {
    pub aifsn: u8,
    /// Admission control mandatory
    pub acm: bool,
    pub logcwmin: u8,
    pub logcwmax: u8,
    pub txop_limit: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WmeParams {
    pub qosinfo: u8,
    pub ac: [AcParams; WME_NUM_AC],
}

impl WmeParams {
    /// Parameter set count of a WME element
    pub fn param_count(data: &[u8]) -> Option<u8> {
        data.get(6).map(|qosinfo| qosinfo & WME_QOSINFO_COUNT)
    }

    /// Parse WME parameter element data (starting at the OUI)
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < WME_PARAM_LEN {
            return None;
        }
        let mut ac = [AcParams::default(); WME_NUM_AC];
        for (params, record) in ac.iter_mut().zip(data[8..WME_PARAM_LEN].chunks_exact(4)) {
            *params = AcParams {
                aifsn: record[0] & 0x0f,
                acm: record[0] & 0x10 != 0,
                logcwmin: record[1] & 0x0f,
                logcwmax: record[1] >> 4,
                txop_limit: u16::from_le_bytes([record[2], record[3]]),
            };
        }
        Some(Self { qosinfo: data[6], ac })
    }
}

/// Traffic indication map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tim<'a> {
    pub count: u8,
    pub period: u8,
    pub bitctl: u8,
    pub bitmap: &'a [u8],
}

impl<'a> Tim<'a> {
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Some(Self {
            count: data[0],
            period: data[1],
            bitctl: data[2],
            bitmap: &data[3..],
        })
    }

    /// Buffered group-addressed traffic
    pub fn group_traffic(&self) -> bool {
        self.bitctl & 0x01 != 0
    }

    /// Whether the partial virtual bitmap has the bit for `aid` set
    pub fn has_traffic(&self, aid: u16) -> bool {
        let offset = (self.bitctl & 0xfe) as usize;
        (aid as usize / 8)
            .checked_sub(offset)
            .and_then(|i| self.bitmap.get(i))
            .map_or(false, |byte| byte & (1 << (aid % 8)) != 0)
    }
}

/// Parameters extracted from a beacon or probe response body
#[derive(Debug, Clone, Default)]
pub struct ScanParams<'a> {
    pub tstamp: u64,
    pub bintval: u16,
    pub capinfo: u16,
    /// DS parameter channel, the receive channel without one
    pub channel: u8,
    pub ssid: &'a [u8],
    pub rates: &'a [u8],
    pub xrates: Option<&'a [u8]>,
    pub erp: Option<u8>,
    pub fh_dwell: Option<u16>,
    pub tim: Option<Tim<'a>>,
    pub country: Option<&'a [u8]>,
    pub rsn: Option<Element<'a>>,
    pub wpa: Option<Element<'a>>,
    pub wme: Option<Element<'a>>,
    pub ath: Option<Element<'a>>,
    /// HT capability data, vendor header stripped
    pub htcap: Option<&'a [u8]>,
    pub htinfo: Option<&'a [u8]>,
}

impl<'a> ScanParams<'a> {
    /// Extract and validate a beacon / probe response body.
    ///
    /// Element problems that do not invalidate the frame (an ERP element of
    /// the wrong size, unknown element ids) are counted on `stats`.
    pub fn parse(
        body: &'a [u8],
        rx_channel: u8,
        phy: PhyMode,
        ht_compat: bool,
        stats: &Stats,
    ) -> std::result::Result<Self, Counter> {
        if body.len() < FIXED_LEN {
            return Err(Counter::TooShort);
        }

        let mut fixed = &body[..FIXED_LEN];
        let mut params = ScanParams {
            tstamp: fixed.get_u64_le(),
            bintval: fixed.get_u16_le(),
            capinfo: fixed.get_u16_le(),
            channel: rx_channel,
            ..Default::default()
        };
        let mut ssid = None;
        let mut rates = None;

        for element in walk(&body[FIXED_LEN..]) {
            let element = element.map_err(|_| Counter::TooShort)?;
            let data = element.data;
            match element.kind {
                ElementKind::Ssid => ssid = Some(data),
                ElementKind::Rates => rates = Some(data),
                ElementKind::ExtRates => params.xrates = Some(data),
                ElementKind::FhParams => {
                    if phy == PhyMode::Fh && data.len() >= 5 {
                        params.fh_dwell = Some(u16::from_le_bytes([data[0], data[1]]));
                    }
                }
                ElementKind::DsParams => {
                    if phy != PhyMode::Fh {
                        if let Some(&channel) = data.first() {
                            params.channel = channel;
                        }
                    }
                }
                ElementKind::Tim => params.tim = Tim::parse(data),
                ElementKind::Country => params.country = Some(data),
                ElementKind::Erp => {
                    if data.len() == 1 {
                        params.erp = Some(data[0]);
                    } else {
                        log::debug!("Ignoring ERP element of {} bytes", data.len());
                        stats.incr(Counter::ElementTooBig);
                    }
                }
                ElementKind::HtCap => params.htcap = Some(data),
                ElementKind::HtInfo => params.htinfo = Some(data),
                ElementKind::VendorHtCap if ht_compat => {
                    params.htcap = params.htcap.or(Some(element.vendor_payload()));
                }
                ElementKind::VendorHtInfo if ht_compat => {
                    params.htinfo = params.htinfo.or(Some(element.vendor_payload()));
                }
                ElementKind::Rsn => params.rsn = Some(element),
                ElementKind::Wpa => params.wpa = Some(element),
                ElementKind::WmeInfo | ElementKind::WmeParam => params.wme = Some(element),
                ElementKind::Atheros => params.ath = Some(element),
                ElementKind::CfParams
                | ElementKind::IbssParams
                | ElementKind::Challenge
                | ElementKind::VendorHtCap
                | ElementKind::VendorHtInfo
                | ElementKind::UnknownVendor => {}
                ElementKind::Unknown(id) => {
                    log::debug!("Unhandled element id {}", id);
                    stats.incr(Counter::ElementUnknown);
                }
            }
        }

        let rates = rates.ok_or(Counter::ElementMissing)?;
        if rates.len() > RATE_MAXSIZE {
            return Err(Counter::ElementTooBig);
        }
        let ssid = ssid.ok_or(Counter::ElementMissing)?;
        if ssid.len() > NWID_LEN {
            return Err(Counter::ElementTooBig);
        }
        if let Some(xrates) = params.xrates {
            if xrates.len() > RATE_MAXSIZE - rates.len() {
                return Err(Counter::ElementTooBig);
            }
        }
        if params.htcap.map_or(false, |data| HtCapabilities::parse(data).is_none())
            || params.htinfo.map_or(false, |data| HtInfo::parse(data).is_none())
        {
            return Err(Counter::TooShort);
        }
        if phy != PhyMode::Fh && params.channel != rx_channel {
            return Err(Counter::ChannelMismatch);
        }
        if !(BINTVAL_MIN..=BINTVAL_MAX).contains(&params.bintval) {
            return Err(Counter::BadBeaconInterval);
        }

        params.ssid = ssid;
        params.rates = rates;
        Ok(params)
    }

    pub fn rate_set(&self) -> RateSet {
        RateSet::from_elements(self.rates, self.xrates)
    }

    pub fn ht_capabilities(&self) -> Option<HtCapabilities> {
        self.htcap.and_then(HtCapabilities::parse)
    }

    pub fn ht_info(&self) -> Option<HtInfo> {
        self.htinfo.and_then(HtInfo::parse)
    }

    /// WME parameters, when the element is the parameter (not info) form
    pub fn wme_params(&self) -> Option<WmeParams> {
        self.wme
            .filter(|element| element.kind == ElementKind::WmeParam)
            .and_then(|element| WmeParams::parse(element.data))
    }
}

fn owned(element: Option<Element<'_>>) -> Option<Vec<u8>> {
    element.map(|e| e.raw.to_vec())
}

/// A BSS seen while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEntry {
    pub bssid: MacAddr,
    pub transmitter: MacAddr,
    pub probe_response: bool,
    pub ssid: Vec<u8>,
    pub channel: u8,
    pub tstamp: u64,
    pub bintval: u16,
    pub capinfo: u16,
    pub rates: RateSet,
    pub erp: Option<u8>,
    pub dtim_period: u8,
    pub country: Option<Vec<u8>>,
    /// Raw security and vendor elements, headers included
    pub rsn_ie: Option<Vec<u8>>,
    pub wpa_ie: Option<Vec<u8>>,
    pub wme_ie: Option<Vec<u8>>,
    pub ath_ie: Option<Vec<u8>>,
    pub ht_cap: Option<HtCapabilities>,
    pub ht_info: Option<HtInfo>,
    pub rssi: i8,
    pub noise: i8,
    pub rstamp: u64,
}

impl ScanEntry {
    pub fn from_params(hdr: &Dot11Header, params: &ScanParams<'_>, meta: &RxMeta) -> Self {
        Self {
            bssid: hdr.addr3,
            transmitter: hdr.addr2,
            probe_response: hdr.mgmt_subtype() == MgmtSubtype::ProbeResp,
            ssid: params.ssid.to_vec(),
            channel: params.channel,
            tstamp: params.tstamp,
            bintval: params.bintval,
            capinfo: params.capinfo,
            rates: params.rate_set(),
            erp: params.erp,
            dtim_period: params.tim.map_or(0, |tim| tim.period),
            country: params.country.map(<[u8]>::to_vec),
            rsn_ie: owned(params.rsn),
            wpa_ie: owned(params.wpa),
            wme_ie: owned(params.wme),
            ath_ie: owned(params.ath),
            ht_cap: params.ht_capabilities(),
            ht_info: params.ht_info(),
            rssi: meta.rssi,
            noise: meta.noise,
            rstamp: meta.rstamp,
        }
    }

    pub fn ssid_lossy(&self) -> String {
        String::from_utf8_lossy(&self.ssid).into_owned()
    }

    pub fn privacy(&self) -> bool {
        self.capinfo & capinfo::PRIVACY != 0
    }
}

impl RxEngine {
    pub(crate) fn recv_beacon(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let hdr = rx.hdr;
        let params = ScanParams::parse(
            rx.body(),
            self.iface.bss.channel,
            self.iface.phy,
            self.config.ht.compat,
            &self.stats,
        )?;

        let probe_resp = hdr.mgmt_subtype() == MgmtSubtype::ProbeResp;
        self.stats
            .incr(if probe_resp { Counter::ProbeResp } else { Counter::Beacon });
        if let Some((_, peer)) = sender.known() {
            peer.link.lock().stats.rx_beacons += 1;
        }

        if self.iface.flags.scanning {
            host.scan_result(ScanEntry::from_params(hdr, &params, &rx.meta));
            return Ok(RxOutcome::Consumed);
        }

        match self.iface.mode {
            OpMode::Station => {
                let from_bss = matches!(
                    (sender.known(), self.iface.bss_peer),
                    (Some((id, _)), Some(bss)) if id == bss
                );
                if from_bss && self.iface.is_running() {
                    if let Some((_, peer)) = sender.known() {
                        self.track_bss(&params, peer, host);
                    }
                }
            }
            OpMode::AdHoc => {
                if params.capinfo & capinfo::IBSS != 0 && hdr.addr3 == self.iface.bss.bssid {
                    self.track_neighbor(hdr.addr2, &params, sender)?;
                }
            }
            OpMode::HostAp | OpMode::Monitor => {}
        }
        Ok(RxOutcome::Consumed)
    }

    /// Follow parameter changes announced by the BSS we run in
    fn track_bss(&mut self, params: &ScanParams<'_>, peer: &Arc<PeerDescriptor>, host: &mut dyn RxHost) {
        let iface = &mut self.iface;
        let is_11g = iface.is_11g();
        let dot11a = iface.phy == PhyMode::Dot11a;
        let mut assoc = peer.assoc.lock();

        assoc.tstamp = params.tstamp;
        iface.bss.tstamp = params.tstamp;
        iface.bss.bintval = params.bintval;

        if let Some(erp) = params.erp {
            if is_11g && erp != iface.bss.erp {
                let protection = erp & ERP_USE_PROTECTION != 0;
                if protection != iface.flags.protection {
                    log::debug!("11g protection {}", if protection { "enabled" } else { "disabled" });
                }
                iface.flags.protection = protection;
                iface.bss.erp = erp;
                assoc.erp = erp;
            }
        }

        if (assoc.capinfo ^ params.capinfo) & capinfo::SHORT_SLOTTIME != 0 {
            iface.flags.short_slot = dot11a || params.capinfo & capinfo::SHORT_SLOTTIME != 0;
            assoc.capinfo = params.capinfo;
            iface.bss.capinfo = params.capinfo;
        }

        if iface.flags.qos {
            if let Some(wme) = params.wme.filter(|e| e.kind == ElementKind::WmeParam) {
                let count = WmeParams::param_count(wme.data);
                if count != iface.bss.wme_param_count {
                    if let Some(wme_params) = WmeParams::parse(wme.data) {
                        log::debug!("WME parameter set {:?} -> {:?}", iface.bss.wme_param_count, count);
                        iface.bss.wme = Some(wme_params);
                        iface.bss.wme_param_count = count;
                    }
                }
            }
        }

        if iface.flags.ht {
            if let Some(info) = params.ht_info() {
                if iface.bss.ht_info != Some(info) {
                    log::debug!("HT operation changed, primary channel {}", info.primary_channel);
                    iface.bss.ht_info = Some(info);
                }
            }
            if let Some(cap) = params.ht_capabilities() {
                if iface.bss.ht_cap != Some(cap) {
                    iface.bss.ht_cap = Some(cap);
                    assoc.ht = Some(cap);
                }
            }
        }

        let rsn = params.rsn.map(|e| Bytes::copy_from_slice(e.raw));
        if rsn != iface.bss.rsn_ie {
            log::debug!("RSN element changed in beacons from {}", iface.bss.bssid);
            iface.bss.rsn_ie = rsn;
        }
        let wpa = params.wpa.map(|e| Bytes::copy_from_slice(e.raw));
        if wpa != iface.bss.wpa_ie {
            log::debug!("WPA element changed in beacons from {}", iface.bss.bssid);
            iface.bss.wpa_ie = wpa;
        }
        drop(assoc);

        if let Some(tim) = params.tim {
            iface.bss.dtim_period = tim.period;
            iface.bss.dtim_count = tim.count;
            if iface.flags.power_save && (tim.group_traffic() || tim.has_traffic(iface.associd)) {
                log::debug!("Traffic buffered for AID {}, leaving power save", iface.associd);
                iface.flags.power_save = false;
                host.send_null_data(iface.bss.bssid);
            }
        }
    }

    fn track_neighbor(
        &self,
        addr: MacAddr,
        params: &ScanParams<'_>,
        sender: &Sender,
    ) -> std::result::Result<(), Counter> {
        let peer = match sender.known() {
            Some((_, peer)) => Arc::clone(peer),
            None => {
                let (_, peer) = self.add_neighbor(addr)?;
                peer.assoc.lock().rates = params.rate_set();
                peer
            }
        };

        let mut assoc = peer.assoc.lock();
        assoc.capinfo = params.capinfo;
        assoc.tstamp = params.tstamp;
        assoc.bintval = params.bintval;
        if let Some(erp) = params.erp {
            assoc.erp = erp;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::id;
    use crate::event::Outbound;
    use crate::input::RxPeer;
    use crate::peers::PeerRole;
    use crate::test_utils::*;

    fn parse(body: &[u8]) -> std::result::Result<ScanParams<'_>, Counter> {
        ScanParams::parse(body, 6, PhyMode::Dot11g, true, &Stats::new())
    }

    #[test]
    fn test_parse_beacon() {
        let body = beacon_body(100, capinfo::ESS, &[element(id::ERP, &[0x02]), element(id::TIM, &[0, 3, 0, 0])]);
        let params = parse(&body).unwrap();

        assert_eq!(params.bintval, 100);
        assert_eq!(params.capinfo, capinfo::ESS);
        assert_eq!(params.ssid, b"lab");
        assert_eq!(params.channel, 6);
        assert_eq!(params.erp, Some(0x02));
        assert_eq!(params.tim.unwrap().period, 3);
        assert_eq!(params.rate_set().basic().count(), 4);
    }

    #[test]
    fn test_required_elements() {
        let mut body = fixed_fields(100, capinfo::ESS);
        body.extend(element(id::SSID, b"lab"));
        assert_eq!(parse(&body).unwrap_err(), Counter::ElementMissing);

        let mut body = fixed_fields(100, capinfo::ESS);
        body.extend(element(id::RATES, &[0x82]));
        assert_eq!(parse(&body).unwrap_err(), Counter::ElementMissing);

        let mut body = fixed_fields(100, capinfo::ESS);
        body.extend(element(id::SSID, &[b'x'; 33]));
        body.extend(element(id::RATES, &[0x82]));
        assert_eq!(parse(&body).unwrap_err(), Counter::ElementTooBig);

        let mut body = fixed_fields(100, capinfo::ESS);
        body.extend(element(id::SSID, b"lab"));
        body.extend(element(id::RATES, &[2, 4, 11, 22, 12, 18, 24, 36]));
        body.extend(element(id::XRATES, &[48, 72, 96, 108, 1, 3, 5, 7]));
        assert_eq!(parse(&body).unwrap_err(), Counter::ElementTooBig);
    }

    #[test]
    fn test_truncated_element() {
        let mut body = beacon_body(100, capinfo::ESS, &[]);
        body.extend([id::COUNTRY, 10, b'U']);
        assert_eq!(parse(&body).unwrap_err(), Counter::TooShort);
        assert_eq!(parse(&body[..8]).unwrap_err(), Counter::TooShort);
    }

    #[test]
    fn test_channel_mismatch() {
        let mut body = fixed_fields(100, capinfo::ESS);
        body.extend(element(id::SSID, b"lab"));
        body.extend(element(id::RATES, &[0x82]));
        body.extend(element(id::DS_PARMS, &[11]));
        assert_eq!(parse(&body).unwrap_err(), Counter::ChannelMismatch);
    }

    #[test]
    fn test_bad_erp_length_is_ignored() {
        let stats = Stats::new();
        let body = beacon_body(100, capinfo::ESS, &[element(id::ERP, &[0x02, 0x00])]);
        let params = ScanParams::parse(&body, 6, PhyMode::Dot11g, true, &stats).unwrap();
        assert_eq!(params.erp, None);
        assert_eq!(stats.get(Counter::ElementTooBig), 1);
    }

    #[test]
    fn test_short_ht_capability_rejected() {
        let body = beacon_body(100, capinfo::ESS, &[element(id::HT_CAP, &[0u8; 10])]);
        assert_eq!(parse(&body).unwrap_err(), Counter::TooShort);

        let body = beacon_body(100, capinfo::ESS, &[element(id::HT_CAP, &[0u8; 26])]);
        assert!(parse(&body).unwrap().ht_capabilities().is_some());
    }

    #[test]
    fn test_beacon_interval_bounds() {
        assert_eq!(parse(&beacon_body(0, capinfo::ESS, &[])).unwrap_err(), Counter::BadBeaconInterval);
        assert_eq!(parse(&beacon_body(1001, capinfo::ESS, &[])).unwrap_err(), Counter::BadBeaconInterval);
        assert!(parse(&beacon_body(25, capinfo::ESS, &[])).is_ok());
        assert!(parse(&beacon_body(1000, capinfo::ESS, &[])).is_ok());
    }

    #[test]
    fn test_zero_interval_beacon_produces_no_scan_result() {
        let mut engine = sta_engine();
        engine.set_scanning(true);
        let mut host: Vec<Outbound> = Vec::new();

        let frame = mgmt_frame(
            MgmtSubtype::Beacon,
            MacAddr::BROADCAST,
            ap_addr(),
            ap_addr(),
            &beacon_body(0, capinfo::ESS, &[]),
        );
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);

        assert_eq!(outcome, RxOutcome::Discarded(Counter::BadBeaconInterval));
        assert_eq!(engine.stats().get(Counter::BadBeaconInterval), 1);
        assert!(host.is_empty());
    }

    #[test]
    fn test_scanning_reports_entry() {
        let mut engine = sta_engine();
        engine.set_scanning(true);
        let mut host: Vec<Outbound> = Vec::new();

        let frame = mgmt_frame(
            MgmtSubtype::ProbeResp,
            sta_addr(),
            ap_addr(),
            ap_addr(),
            &beacon_body(100, capinfo::ESS | capinfo::PRIVACY, &[element(id::RSN, &rsn_element_data(4, &[4], &[2], None))]),
        );
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert_eq!(outcome, RxOutcome::Consumed);
        assert_eq!(engine.stats().get(Counter::ProbeResp), 1);

        match host.as_slice() {
            [Outbound::ScanResult(entry)] => {
                assert_eq!(entry.bssid, ap_addr());
                assert!(entry.probe_response);
                assert!(entry.privacy());
                assert_eq!(entry.ssid_lossy(), "lab");
                assert_eq!(entry.rsn_ie.as_ref().unwrap()[0], id::RSN);
            }
            other => panic!("unexpected outbound: {:?}", other),
        }
        assert!(engine.peers().is_empty());
    }

    #[test]
    fn test_scan_entry_serializes() {
        let body = beacon_body(100, capinfo::ESS, &[]);
        let params = parse(&body).unwrap();
        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, ap_addr(), ap_addr(), &body);
        let hdr = Dot11Header::parse(&frame).unwrap();
        let entry = ScanEntry::from_params(&hdr, &params, &meta());

        let json = serde_json::to_string(&entry).unwrap();
        let back: ScanEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_station_tracks_erp_and_security() {
        let (mut engine, bss) = running_station();
        let mut host: Vec<Outbound> = Vec::new();
        assert!(!engine.iface().flags.protection);

        let body = beacon_body(
            100,
            capinfo::ESS,
            &[
                element(id::ERP, &[ERP_USE_PROTECTION]),
                element(id::RSN, &rsn_element_data(4, &[4], &[2], None)),
            ],
        );
        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, ap_addr(), ap_addr(), &body);
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(bss), &mut host);

        assert_eq!(outcome, RxOutcome::Consumed);
        assert!(engine.iface().flags.protection);
        assert!(engine.iface().bss.rsn_ie.is_some());
        assert_eq!(engine.peers().get(bss).unwrap().assoc.lock().erp, ERP_USE_PROTECTION);
    }

    #[test]
    fn test_tim_wakes_dozing_station() {
        let (mut engine, bss) = running_station();
        let mut host: Vec<Outbound> = Vec::new();
        engine.set_power_save(true, &mut host);
        assert!(engine.iface().flags.power_save);
        host.clear();

        // AID 1 set in a bitmap starting at offset 0
        let body = beacon_body(100, capinfo::ESS, &[element(id::TIM, &[0, 1, 0, 0x02])]);
        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, ap_addr(), ap_addr(), &body);
        engine.input(Bytes::from(frame), meta(), RxPeer::Known(bss), &mut host);

        assert!(!engine.iface().flags.power_save);
        assert!(matches!(host.as_slice(), [Outbound::NullData(addr)] if *addr == ap_addr()));
    }

    #[test]
    fn test_tim_bitmap_offset() {
        let tim = Tim::parse(&[0, 1, 0x02, 0x01, 0x80]).unwrap();
        // bitmap starts at byte 2 of the virtual bitmap: AIDs 16..32
        assert!(tim.has_traffic(16));
        assert!(tim.has_traffic(31));
        assert!(!tim.has_traffic(1));
        assert!(!tim.has_traffic(17));
        assert!(!tim.group_traffic());
        assert!(Tim::parse(&[0, 1, 0]).is_none());
    }

    #[test]
    fn test_wme_params() {
        let mut data = vec![0x00, 0x50, 0xf2, 0x02, 0x01, 0x01, 0x83, 0x00];
        for aci in 0..4u8 {
            data.extend([0x10 | (aci + 2), 0xa4, 0x5e, 0x00]);
        }
        assert_eq!(WmeParams::param_count(&data), Some(3));

        let params = WmeParams::parse(&data).unwrap();
        assert_eq!(params.qosinfo, 0x83);
        assert_eq!(params.ac[0].aifsn, 2);
        assert!(params.ac[1].acm);
        assert_eq!(params.ac[2].logcwmin, 4);
        assert_eq!(params.ac[3].logcwmax, 10);
        assert_eq!(params.ac[3].txop_limit, 0x5e);
        assert!(WmeParams::parse(&data[..20]).is_none());
    }

    #[test]
    fn test_adhoc_learns_neighbors() {
        let mut engine = adhoc_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let bssid = engine.iface().bss.bssid;

        let body = beacon_body(100, capinfo::IBSS, &[]);
        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, other_addr(), bssid, &body);
        assert_eq!(
            engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host),
            RxOutcome::Consumed
        );

        let (_, neighbor) = engine.peers().find(&other_addr()).unwrap();
        assert_eq!(neighbor.role(), PeerRole::Neighbor);
        assert_eq!(neighbor.assoc.lock().capinfo, capinfo::IBSS);
        assert_eq!(neighbor.assoc.lock().rates.len(), 4);

        // an ESS beacon does not add anyone
        let body = beacon_body(100, capinfo::ESS, &[]);
        let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, sta_addr(), bssid, &body);
        engine.input(Bytes::from(frame), meta(), RxPeer::Unknown, &mut host);
        assert!(engine.peers().find(&sta_addr()).is_none());
    }
}
