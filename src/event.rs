//! Outbound interface
//!
//! Everything the receive path produces leaves through an [`RxHost`]:
//! management frames to transmit, power-save deliveries, lifecycle events,
//! decapsulated frames and scan results.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::frame::{EtherFrame, MacAddr, MgmtSubtype};
use crate::peers::PeerId;
use crate::scan::ScanEntry;
use crate::state::NodeState;

/// Request to send a management frame
///
/// `arg` carries the status or reason code. For authentication frames it
/// packs `(status << 16) | seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxRequest {
    pub addr: MacAddr,
    pub subtype: MgmtSubtype,
    pub arg: u32,
    pub peer: Option<PeerId>,
}

impl TxRequest {
    pub fn new(addr: MacAddr, subtype: MgmtSubtype, arg: u32, peer: Option<PeerId>) -> Self {
        Self {
            addr,
            subtype,
            arg,
            peer,
        }
    }

    pub fn auth(addr: MacAddr, peer: Option<PeerId>, seq: u16, status: u16) -> Self {
        Self::new(addr, MgmtSubtype::Auth, (status as u32) << 16 | seq as u32, peer)
    }

    pub fn deauth(addr: MacAddr, peer: Option<PeerId>, reason: u16) -> Self {
        Self::new(addr, MgmtSubtype::Deauth, reason as u32, peer)
    }

    pub fn disassoc(addr: MacAddr, peer: Option<PeerId>, reason: u16) -> Self {
        Self::new(addr, MgmtSubtype::Disassoc, reason as u32, peer)
    }

    /// Authentication transaction sequence number
    pub fn auth_seq(&self) -> u16 {
        (self.arg & 0xffff) as u16
    }

    /// Status for authentication requests, status or reason otherwise
    pub fn status(&self) -> u16 {
        match self.subtype {
            MgmtSubtype::Auth => (self.arg >> 16) as u16,
            _ => (self.arg & 0xffff) as u16,
        }
    }
}

/// A buffered frame released from a power-save queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsDelivery {
    pub addr: MacAddr,
    pub peer: PeerId,
    pub frame: Bytes,
    /// More frames remain queued
    pub more_data: bool,
}

/// Why the station went back to discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiscoveryReason {
    AuthRejected(u16),
    RatesUnsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LifecycleEvent {
    /// A station (re)associated with us
    Join {
        addr: MacAddr,
        peer: PeerId,
        aid: u16,
        reassoc: bool,
    },
    /// A peer left the BSS
    Leave {
        addr: MacAddr,
        aid: u16,
        reason: u16,
    },
    /// Station association completed
    EnterRunning {
        bssid: MacAddr,
        aid: u16,
    },
    ReturnToDiscovery {
        bssid: MacAddr,
        reason: DiscoveryReason,
    },
    StateChange {
        from: NodeState,
        to: NodeState,
    },
}

/// Everything the engine emits, in emission order
#[derive(Debug, Clone)]
pub enum Outbound {
    Mgmt(TxRequest),
    NullData(MacAddr),
    PsDeliver(PsDelivery),
    Event(LifecycleEvent),
    Deliver(EtherFrame),
    ScanResult(Box<ScanEntry>),
    SetTim { aid: u16, set: bool },
}

/// Receiver of everything the engine emits
pub trait RxHost {
    fn emit(&mut self, out: Outbound);

    fn send_mgmt(&mut self, req: TxRequest) {
        self.emit(Outbound::Mgmt(req));
    }

    fn send_null_data(&mut self, addr: MacAddr) {
        self.emit(Outbound::NullData(addr));
    }

    /// Transmit bypassing power-save queueing
    fn transmit(&mut self, delivery: PsDelivery) {
        self.emit(Outbound::PsDeliver(delivery));
    }

    fn notify(&mut self, event: LifecycleEvent) {
        self.emit(Outbound::Event(event));
    }

    fn deliver(&mut self, frame: EtherFrame) {
        self.emit(Outbound::Deliver(frame));
    }

    fn scan_result(&mut self, entry: ScanEntry) {
        self.emit(Outbound::ScanResult(Box::new(entry)));
    }

    fn set_tim(&mut self, aid: u16, set: bool) {
        self.emit(Outbound::SetTim { aid, set });
    }
}

impl RxHost for Vec<Outbound> {
    fn emit(&mut self, out: Outbound) {
        self.push(out);
    }
}

/// Hand-off to an async consumer
impl RxHost for mpsc::UnboundedSender<Outbound> {
    fn emit(&mut self, out: Outbound) {
        if self.send(out).is_err() {
            log::warn!("Outbound channel closed, dropping event");
        }
    }
}
