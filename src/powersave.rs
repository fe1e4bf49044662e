//! Power save
//!
//! Buffering for dozing stations and PS-Poll delivery. The TIM bit of a
//! station is raised when its queue goes from empty to non-empty and only
//! dropped once nothing is left to deliver.

use bytes::Bytes;
use std::sync::Arc;

use crate::event::{PsDelivery, RxHost, TxRequest};
use crate::frame::reason;
use crate::input::{RxEngine, RxFrame, RxOutcome, Sender, Verdict};
use crate::peers::{PeerDescriptor, PeerId};
use crate::stats::Counter;
use crate::{Dot11Error, Result};

impl RxEngine {
    /// Follow the power-management bit of frames from an associated station
    pub(crate) fn track_power_save(
        &self,
        id: PeerId,
        peer: &Arc<PeerDescriptor>,
        pwr_mgt: bool,
        host: &mut dyn RxHost,
    ) {
        if peer.in_power_save() != pwr_mgt {
            self.set_peer_power_save(id, peer, pwr_mgt, host);
        }
    }

    /// Enter or leave power save on behalf of a station
    pub fn node_pwrsave(&self, id: PeerId, enable: bool, host: &mut dyn RxHost) -> Result<()> {
        let peer = self
            .peers
            .get(id)
            .ok_or_else(|| Dot11Error::PeerNotFound(id.to_string()))?;
        self.set_peer_power_save(id, &peer, enable, host);
        Ok(())
    }

    fn set_peer_power_save(&self, id: PeerId, peer: &PeerDescriptor, enable: bool, host: &mut dyn RxHost) {
        let addr = peer.address();
        let aid = peer.associd();
        let mut ps = peer.ps.lock();
        if ps.power_save == enable {
            return;
        }
        ps.power_save = enable;
        if enable {
            log::debug!("Station {} entered power save", addr);
            return;
        }

        log::debug!("Station {} left power save, flushing {} frames", addr, ps.queue.len());
        let flushed = ps.queue.len() as u64;
        while let Some(frame) = ps.queue.pop_front() {
            host.transmit(PsDelivery {
                addr,
                peer: id,
                frame,
                more_data: !ps.queue.is_empty(),
            });
        }
        if ps.tim {
            ps.tim = false;
            host.set_tim(aid, false);
        }
        drop(ps);
        peer.link.lock().stats.ps_delivered += flushed;
    }

    /// Queue a frame for a dozing station.
    ///
    /// Returns whether the frame was queued; `false` means the station is
    /// awake and the frame should go out directly.
    pub fn buffer_frame(&self, id: PeerId, frame: Bytes, host: &mut dyn RxHost) -> Result<bool> {
        let peer = self
            .peers
            .get(id)
            .ok_or_else(|| Dot11Error::PeerNotFound(id.to_string()))?;
        let aid = peer.associd();
        let mut ps = peer.ps.lock();
        if !ps.power_save {
            return Ok(false);
        }
        if ps.queue.len() >= self.config.peers.ps_queue_len {
            drop(ps);
            self.stats.incr(Counter::PsQueueOverflow);
            peer.link.lock().stats.ps_dropped += 1;
            log::debug!("Power-save queue of {} full, frame dropped", peer.address());
            return Ok(false);
        }

        ps.queue.push_back(frame);
        if ps.queue.len() == 1 && !ps.tim && aid != 0 {
            ps.tim = true;
            host.set_tim(aid, true);
        }
        drop(ps);
        peer.link.lock().stats.ps_queued += 1;
        Ok(true)
    }

    /// Clear the TIM bit of a station; refused while frames are queued
    pub fn request_clear_tim(&self, id: PeerId, host: &mut dyn RxHost) -> bool {
        let Some(peer) = self.peers.get(id) else {
            return false;
        };
        let aid = peer.associd();
        let mut ps = peer.ps.lock();
        if !ps.queue.is_empty() {
            log::debug!("Keeping TIM for {}: {} frames queued", peer.address(), ps.queue.len());
            return false;
        }
        if ps.tim {
            ps.tim = false;
            host.set_tim(aid, false);
        }
        true
    }

    pub(crate) fn recv_ps_poll(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let addr = rx.sender();
        let (id, peer) = match sender.known() {
            Some((id, peer)) if peer.associd() != 0 => (id, peer),
            known => {
                log::debug!("PS-Poll from unassociated {}", addr);
                host.send_mgmt(TxRequest::deauth(addr, known.map(|(id, _)| id), reason::NOT_ASSOCED));
                return Err(Counter::PsUnassoc);
            }
        };

        let aid = peer.associd();
        if rx.hdr.ps_poll_aid() != aid {
            log::debug!("PS-Poll from {} with aid {}, expected {}", addr, rx.hdr.ps_poll_aid(), aid);
            host.send_mgmt(TxRequest::deauth(addr, Some(id), reason::NOT_ASSOCED));
            return Err(Counter::PsBadAid);
        }

        let mut ps = peer.ps.lock();
        let Some(frame) = ps.queue.pop_front() else {
            log::debug!("PS-Poll from {} with nothing queued", addr);
            host.send_null_data(addr);
            if ps.tim {
                ps.tim = false;
                host.set_tim(aid, false);
            }
            drop(ps);
            self.stats.incr(Counter::PsQueueEmpty);
            return Ok(RxOutcome::Consumed);
        };

        let more_data = !ps.queue.is_empty();
        if !more_data && ps.tim {
            ps.tim = false;
            host.set_tim(aid, false);
        }
        drop(ps);

        host.transmit(PsDelivery {
            addr,
            peer: id,
            frame,
            more_data,
        });
        peer.link.lock().stats.ps_delivered += 1;
        Ok(RxOutcome::Consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Outbound;
    use crate::frame::{Direction, MgmtSubtype};
    use crate::input::RxPeer;
    use crate::test_utils::*;

    fn dozing_station(engine: &mut RxEngine) -> PeerId {
        let id = associate_station(engine, sta_addr());
        let mut host: Vec<Outbound> = Vec::new();
        engine.node_pwrsave(id, true, &mut host).unwrap();
        assert!(host.is_empty());
        id
    }

    fn tim_changes(host: &[Outbound]) -> Vec<(u16, bool)> {
        host.iter()
            .filter_map(|out| match out {
                Outbound::SetTim { aid, set } => Some((*aid, *set)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_buffered_frame_poll() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);

        assert!(engine.buffer_frame(id, Bytes::from_static(b"only"), &mut host).unwrap());
        assert_eq!(tim_changes(&host), vec![(1, true)]);
        host.clear();

        let outcome = engine.input(
            Bytes::from(ps_poll(1, ap_addr(), sta_addr())),
            meta(),
            RxPeer::Known(id),
            &mut host,
        );
        assert_eq!(outcome, RxOutcome::Consumed);

        let deliveries = ps_delivered(&host);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].frame, Bytes::from_static(b"only"));
        assert!(!deliveries[0].more_data);
        assert_eq!(tim_changes(&host), vec![(1, false)]);

        let peer = engine.peers().get(id).unwrap();
        assert!(!peer.ps.lock().tim);
        assert_eq!(peer.link.lock().stats.ps_delivered, 1);
    }

    #[test]
    fn test_poll_with_more_queued() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);
        engine.buffer_frame(id, Bytes::from_static(b"one"), &mut host).unwrap();
        engine.buffer_frame(id, Bytes::from_static(b"two"), &mut host).unwrap();
        assert_eq!(tim_changes(&host), vec![(1, true)]);
        host.clear();

        engine.input(
            Bytes::from(ps_poll(1, ap_addr(), sta_addr())),
            meta(),
            RxPeer::Known(id),
            &mut host,
        );
        let deliveries = ps_delivered(&host);
        assert_eq!(deliveries[0].frame, Bytes::from_static(b"one"));
        assert!(deliveries[0].more_data);
        assert!(tim_changes(&host).is_empty());
        assert!(engine.peers().get(id).unwrap().ps.lock().tim);
    }

    #[test]
    fn test_poll_with_empty_queue() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);

        let outcome = engine.input(
            Bytes::from(ps_poll(1, ap_addr(), sta_addr())),
            meta(),
            RxPeer::Known(id),
            &mut host,
        );
        assert_eq!(outcome, RxOutcome::Consumed);
        assert!(matches!(host[0], Outbound::NullData(addr) if addr == sta_addr()));
        assert_eq!(engine.stats().get(Counter::PsQueueEmpty), 1);
    }

    #[test]
    fn test_poll_from_unassociated_or_wrong_aid() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();

        let outcome = engine.input(
            Bytes::from(ps_poll(1, ap_addr(), sta_addr())),
            meta(),
            RxPeer::Unknown,
            &mut host,
        );
        assert_eq!(outcome, RxOutcome::Discarded(Counter::PsUnassoc));
        let sent = mgmt_sent(&host);
        assert_eq!(sent[0].subtype, MgmtSubtype::Deauth);
        assert_eq!(sent[0].status(), reason::NOT_ASSOCED);

        let id = dozing_station(&mut engine);
        let outcome = engine.input(
            Bytes::from(ps_poll(5, ap_addr(), sta_addr())),
            meta(),
            RxPeer::Known(id),
            &mut host,
        );
        assert_eq!(outcome, RxOutcome::Discarded(Counter::PsBadAid));
        assert_eq!(mgmt_sent(&host).len(), 2);
    }

    #[test]
    fn test_queue_overflow() {
        let mut config = test_config(crate::state::OpMode::HostAp);
        config.peers.ps_queue_len = 2;
        let mut engine = RxEngine::new(config).unwrap();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);

        assert!(engine.buffer_frame(id, Bytes::from_static(b"1"), &mut host).unwrap());
        assert!(engine.buffer_frame(id, Bytes::from_static(b"2"), &mut host).unwrap());
        assert!(!engine.buffer_frame(id, Bytes::from_static(b"3"), &mut host).unwrap());
        assert_eq!(engine.stats().get(Counter::PsQueueOverflow), 1);
        assert_eq!(engine.peers().get(id).unwrap().ps.lock().queue.len(), 2);
    }

    #[test]
    fn test_awake_station_is_not_buffered() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = associate_station(&mut engine, sta_addr());

        assert!(!engine.buffer_frame(id, Bytes::from_static(b"now"), &mut host).unwrap());
        assert!(host.is_empty());
    }

    #[test]
    fn test_clear_tim_refused_while_queued() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);
        engine.buffer_frame(id, Bytes::from_static(b"held"), &mut host).unwrap();

        assert!(!engine.request_clear_tim(id, &mut host));
        assert!(engine.peers().get(id).unwrap().ps.lock().tim);
    }

    #[test]
    fn test_wake_flushes_queue() {
        let mut engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let id = dozing_station(&mut engine);
        for payload in [b"a", b"b", b"c"] {
            engine.buffer_frame(id, Bytes::from_static(payload), &mut host).unwrap();
        }
        host.clear();

        // a data frame with the power-management bit clear wakes the station
        let frame = DataFrameBuilder::new(Direction::ToDs, ap_addr(), sta_addr(), other_addr())
            .build(&snap_payload(0x0800, b"up"));
        let outcome = engine.input(Bytes::from(frame), meta(), RxPeer::Known(id), &mut host);
        assert_eq!(outcome, RxOutcome::Delivered(1));

        let deliveries = ps_delivered(&host);
        assert_eq!(deliveries.len(), 3);
        assert_eq!(
            deliveries.iter().map(|d| d.more_data).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        assert_eq!(tim_changes(&host), vec![(1, false)]);

        let peer = engine.peers().get(id).unwrap();
        assert!(!peer.in_power_save());
        assert!(peer.ps.lock().queue.is_empty());
        assert!(engine.request_clear_tim(id, &mut host));
    }

    #[test]
    fn test_unknown_peer() {
        let engine = ap_engine();
        let mut host: Vec<Outbound> = Vec::new();
        let (id, _) = engine.peers().insert(other_addr(), crate::peers::PeerRole::Station).unwrap();
        engine.peers().remove(id);

        assert!(engine.node_pwrsave(id, true, &mut host).is_err());
        assert!(engine.buffer_frame(id, Bytes::new(), &mut host).is_err());
        assert!(!engine.request_clear_tim(id, &mut host));
    }
}
