//! Frame builders and engine fixtures shared by the unit tests

use crate::config::EngineConfig;
use crate::element::id;
use crate::event::{Outbound, PsDelivery, TxRequest};
use crate::frame::{
    capinfo, Direction, Dot11Header, EtherFrame, MacAddr, MgmtSubtype, DATA_SUBTYPE_NODATA, DATA_SUBTYPE_QOS,
    FC1_MORE_FRAG, FC1_PROTECTED, FC1_PWR_MGT, FC1_RETRY, QOS_AMSDU, SEQ_SHIFT,
};
use crate::input::{RxEngine, RxMeta};
use crate::peers::{AuthState, PeerId, PeerRole};
use crate::scan::{ScanEntry, ScanParams};
use crate::state::{NodeState, OpMode};
use crate::stats::Stats;
use crate::LifecycleEvent;

pub fn ap_addr() -> MacAddr {
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0a])
}

pub fn sta_addr() -> MacAddr {
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0b])
}

pub fn other_addr() -> MacAddr {
    MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x0c])
}

pub fn meta() -> RxMeta {
    RxMeta {
        rssi: -50,
        noise: -95,
        rstamp: 1000,
        decrypted: false,
    }
}

pub fn mgmt_frame(subtype: MgmtSubtype, a1: MacAddr, a2: MacAddr, a3: MacAddr, body: &[u8]) -> Vec<u8> {
    mgmt_frame_fc1(subtype, a1, a2, a3, 0, body)
}

pub fn mgmt_frame_fc1(
    subtype: MgmtSubtype,
    a1: MacAddr,
    a2: MacAddr,
    a3: MacAddr,
    fc1: u8,
    body: &[u8],
) -> Vec<u8> {
    let st: u8 = subtype.into();
    let mut frame = vec![st << 4, fc1, 0, 0];
    frame.extend_from_slice(&a1.0);
    frame.extend_from_slice(&a2.0);
    frame.extend_from_slice(&a3.0);
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(body);
    frame
}

/// Data frame under construction
#[derive(Debug, Clone)]
pub struct DataFrameBuilder {
    dir: Direction,
    addrs: [MacAddr; 3],
    addr4: Option<MacAddr>,
    fc1: u8,
    seq_ctl: u16,
    qos: Option<u16>,
    null: bool,
}

impl DataFrameBuilder {
    pub fn new(dir: Direction, a1: MacAddr, a2: MacAddr, a3: MacAddr) -> Self {
        Self {
            dir,
            addrs: [a1, a2, a3],
            addr4: None,
            fc1: 0,
            seq_ctl: 0,
            qos: None,
            null: false,
        }
    }

    pub fn qos(mut self, tid: u8) -> Self {
        self.qos = Some(self.qos.unwrap_or(0) & QOS_AMSDU | u16::from(tid & 0x0f));
        self
    }

    pub fn amsdu(mut self) -> Self {
        self.qos = Some(self.qos.unwrap_or(0) | QOS_AMSDU);
        self
    }

    /// Only emitted for DS-to-DS frames
    pub fn addr4(mut self, addr: MacAddr) -> Self {
        self.addr4 = Some(addr);
        self
    }

    pub fn seq(mut self, seq: u16, frag: u8) -> Self {
        self.seq_ctl = seq << SEQ_SHIFT | u16::from(frag & 0x0f);
        self
    }

    pub fn more_frag(mut self) -> Self {
        self.fc1 |= FC1_MORE_FRAG;
        self
    }

    pub fn retry(mut self) -> Self {
        self.fc1 |= FC1_RETRY;
        self
    }

    pub fn protected(mut self) -> Self {
        self.fc1 |= FC1_PROTECTED;
        self
    }

    pub fn pwr_mgt(mut self) -> Self {
        self.fc1 |= FC1_PWR_MGT;
        self
    }

    pub fn null(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn build(&self, body: &[u8]) -> Vec<u8> {
        let mut subtype = 0u8;
        if self.qos.is_some() {
            subtype |= DATA_SUBTYPE_QOS;
        }
        if self.null {
            subtype |= DATA_SUBTYPE_NODATA;
        }
        let dir = match self.dir {
            Direction::NoDs => 0,
            Direction::ToDs => 1,
            Direction::FromDs => 2,
            Direction::DsToDs => 3,
        };

        let mut frame = vec![0x08 | subtype << 4, self.fc1 | dir, 0, 0];
        for addr in &self.addrs {
            frame.extend_from_slice(&addr.0);
        }
        frame.extend_from_slice(&self.seq_ctl.to_le_bytes());
        if self.dir == Direction::DsToDs {
            frame.extend_from_slice(&self.addr4.unwrap_or(MacAddr::ZERO).0);
        }
        if let Some(qos) = self.qos {
            frame.extend_from_slice(&qos.to_le_bytes());
        }
        frame.extend_from_slice(body);
        frame
    }
}

/// PS-Poll control frame; the duration field carries the AID
pub fn ps_poll(aid: u16, bssid: MacAddr, ta: MacAddr) -> Vec<u8> {
    let mut frame = vec![0xa4, 0x00];
    frame.extend_from_slice(&(aid | 0xc000).to_le_bytes());
    frame.extend_from_slice(&bssid.0);
    frame.extend_from_slice(&ta.0);
    frame
}

pub fn element(id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = vec![id, data.len() as u8];
    out.extend_from_slice(data);
    out
}

/// Timestamp, beacon interval and capability
pub fn fixed_fields(bintval: u16, caps: u16) -> Vec<u8> {
    let mut body = 0x0102_0304_0506_0708u64.to_le_bytes().to_vec();
    body.extend_from_slice(&bintval.to_le_bytes());
    body.extend_from_slice(&caps.to_le_bytes());
    body
}

/// Beacon for SSID "lab" on channel 6 with the 802.11b rates
pub fn beacon_body(bintval: u16, caps: u16, extra: &[Vec<u8>]) -> Vec<u8> {
    let mut body = fixed_fields(bintval, caps);
    body.extend(element(id::SSID, b"lab"));
    body.extend(element(id::RATES, &[0x82, 0x84, 0x8b, 0x96]));
    body.extend(element(id::DS_PARMS, &[6]));
    for e in extra {
        body.extend_from_slice(e);
    }
    body
}

pub fn auth_body(alg: u16, seq: u16, status: u16, extra: &[u8]) -> Vec<u8> {
    let mut body = alg.to_le_bytes().to_vec();
    body.extend_from_slice(&seq.to_le_bytes());
    body.extend_from_slice(&status.to_le_bytes());
    body.extend_from_slice(extra);
    body
}

pub fn ssid_and_rates(ssid: &[u8]) -> Vec<Vec<u8>> {
    vec![element(id::SSID, ssid), element(id::RATES, &[0x82, 0x84, 0x8b, 0x96])]
}

/// Association request with a listen interval of 10; a current AP makes it
/// a reassociation body.
pub fn assoc_req_body(caps: u16, current_ap: Option<MacAddr>, elements: &[Vec<u8>]) -> Vec<u8> {
    let mut body = caps.to_le_bytes().to_vec();
    body.extend_from_slice(&10u16.to_le_bytes());
    if let Some(ap) = current_ap {
        body.extend_from_slice(&ap.0);
    }
    body.extend(elements.concat());
    body
}

pub fn assoc_resp_body(caps: u16, status: u16, aid: u16, elements: &[Vec<u8>]) -> Vec<u8> {
    let mut body = caps.to_le_bytes().to_vec();
    body.extend_from_slice(&status.to_le_bytes());
    body.extend_from_slice(&aid.to_le_bytes());
    body.extend(elements.concat());
    body
}

fn suite_list(out: &mut Vec<u8>, oui: [u8; 3], selectors: &[u8]) {
    out.extend_from_slice(&(selectors.len() as u16).to_le_bytes());
    for sel in selectors {
        out.extend_from_slice(&oui);
        out.push(*sel);
    }
}

/// RSN element data, version 1
pub fn rsn_element_data(group: u8, pairwise: &[u8], akm: &[u8], caps: Option<u16>) -> Vec<u8> {
    const OUI: [u8; 3] = [0x00, 0x0f, 0xac];
    let mut data = 1u16.to_le_bytes().to_vec();
    data.extend_from_slice(&OUI);
    data.push(group);
    suite_list(&mut data, OUI, pairwise);
    suite_list(&mut data, OUI, akm);
    if let Some(caps) = caps {
        data.extend_from_slice(&caps.to_le_bytes());
    }
    data
}

/// WPA vendor element data, starting at the OUI
pub fn wpa_element_data(group: u8, pairwise: &[u8], akm: &[u8]) -> Vec<u8> {
    const OUI: [u8; 3] = [0x00, 0x50, 0xf2];
    let mut data = vec![0x00, 0x50, 0xf2, 0x01];
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&OUI);
    data.push(group);
    suite_list(&mut data, OUI, pairwise);
    suite_list(&mut data, OUI, akm);
    data
}

/// LLC/SNAP encapsulated payload
pub fn snap_payload(ether_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];
    body.extend_from_slice(&ether_type.to_be_bytes());
    body.extend_from_slice(payload);
    body
}

/// One A-MSDU subframe without trailing padding
pub fn amsdu_subframe(da: MacAddr, sa: MacAddr, payload: &[u8]) -> Vec<u8> {
    let mut sub = da.0.to_vec();
    sub.extend_from_slice(&sa.0);
    sub.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    sub.extend_from_slice(payload);
    sub
}

pub fn test_config(mode: OpMode) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.general.mode = mode;
    config.general.address = if mode == OpMode::Station {
        sta_addr()
    } else {
        ap_addr()
    };
    config.bss.ssid = "lab".to_string();
    config
}

pub fn sta_engine() -> RxEngine {
    RxEngine::new(test_config(OpMode::Station)).unwrap()
}

pub fn ap_engine() -> RxEngine {
    RxEngine::new(test_config(OpMode::HostAp)).unwrap()
}

pub fn adhoc_engine() -> RxEngine {
    RxEngine::new(test_config(OpMode::AdHoc)).unwrap()
}

/// What scanning would report for a "lab" beacon from `bssid`
pub fn scan_entry(bssid: MacAddr) -> ScanEntry {
    let body = beacon_body(100, capinfo::ESS, &[]);
    let frame = mgmt_frame(MgmtSubtype::Beacon, MacAddr::BROADCAST, bssid, bssid, &body);
    let hdr = Dot11Header::parse(&frame).unwrap();
    let params = ScanParams::parse(&frame[hdr.len..], 6, Default::default(), true, &Stats::new()).unwrap();
    ScanEntry::from_params(&hdr, &params, &meta())
}

/// Station engine joined to the "lab" BSS at `ap_addr`, still in Scan
pub fn join(config: EngineConfig) -> (RxEngine, PeerId) {
    let mut engine = RxEngine::new(config).unwrap();
    let bss = engine.join_bss(&scan_entry(ap_addr())).unwrap();
    (engine, bss)
}

pub fn joined_station() -> (RxEngine, PeerId) {
    join(test_config(OpMode::Station))
}

/// Station associated with `ap_addr` as AID 1
pub fn running_station() -> (RxEngine, PeerId) {
    let (mut engine, bss) = joined_station();
    engine.iface.set_state(NodeState::Run);
    engine.iface.associd = 1;
    let peer = engine.peers.get(bss).unwrap();
    let mut assoc = peer.assoc.lock();
    assoc.auth = AuthState::Authenticated;
    assoc.associd = 1;
    assoc.authorized = true;
    drop(assoc);
    (engine, bss)
}

/// Authenticated station without an association
pub fn authenticated_station(engine: &RxEngine, addr: MacAddr) -> PeerId {
    let (id, peer) = engine.peers.insert(addr, PeerRole::Station).unwrap();
    peer.assoc.lock().auth = AuthState::Authenticated;
    id
}

/// Station associated with an access point engine
pub fn associate_station(engine: &mut RxEngine, addr: MacAddr) -> PeerId {
    let id = authenticated_station(engine, addr);
    let aid = engine.peers.alloc_aid().unwrap();
    let peer = engine.peers.get(id).unwrap();
    let mut assoc = peer.assoc.lock();
    assoc.associd = aid;
    assoc.authorized = true;
    assoc.capinfo = capinfo::ESS;
    assoc.rates = engine.policy.rates.clone();
    drop(assoc);
    id
}

pub fn mgmt_sent(host: &[Outbound]) -> Vec<TxRequest> {
    host.iter()
        .filter_map(|out| match out {
            Outbound::Mgmt(req) => Some(*req),
            _ => None,
        })
        .collect()
}

pub fn delivered(host: &[Outbound]) -> Vec<EtherFrame> {
    host.iter()
        .filter_map(|out| match out {
            Outbound::Deliver(frame) => Some(frame.clone()),
            _ => None,
        })
        .collect()
}

pub fn events(host: &[Outbound]) -> Vec<LifecycleEvent> {
    host.iter()
        .filter_map(|out| match out {
            Outbound::Event(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

pub fn ps_delivered(host: &[Outbound]) -> Vec<PsDelivery> {
    host.iter()
        .filter_map(|out| match out {
            Outbound::PsDeliver(delivery) => Some(delivery.clone()),
            _ => None,
        })
        .collect()
}
