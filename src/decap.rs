//! Data frame decapsulation and delivery
//!
//! Turns a complete 802.11 data frame into one or more [`EtherFrame`]s:
//! plain frames, aggregated MSDUs (A-MSDU) and Atheros fast-frame tunnels.
//! Each resulting frame then passes the port policy before it reaches the
//! bridging layer.

use bytes::{Buf, Bytes};
use std::sync::Arc;

use crate::event::RxHost;
use crate::frame::{ethertype, Direction, Dot11Header, EtherFrame, MacAddr, ETHER_HDR_LEN};
use crate::input::{RxEngine, RxMeta, RxOutcome, Verdict};
use crate::peers::{PeerDescriptor, PeerId};
use crate::stats::Counter;

pub const LLC_SNAP_LEN: usize = 8;
/// RFC 1042 LLC/SNAP header with a zero organization code
pub const RFC1042_SNAP: [u8; 6] = [0xaa, 0xaa, 0x03, 0x00, 0x00, 0x00];

/// Fast-frame tunnel tag following the 0x88bd ether-type
pub const FF_TAG_LEN: usize = 4;
pub const FF_PROTO_MASK: u32 = 0x3f;
pub const FF_PROTO_L2TUNNEL: u32 = 0;

/// LLC XID payload of the layer-2 update frame
pub const L2_UPDATE_XID: [u8; 6] = [0x00, 0x00, 0xf5, 0x81, 0x80, 0x00];

/// Destination and source for a data frame's direction
pub fn data_addresses(hdr: &Dot11Header) -> (MacAddr, MacAddr) {
    match hdr.direction() {
        Direction::NoDs => (hdr.addr1, hdr.addr2),
        Direction::ToDs => (hdr.addr3, hdr.addr2),
        Direction::FromDs => (hdr.addr1, hdr.addr3),
        Direction::DsToDs => (hdr.addr3, hdr.addr4.unwrap_or(hdr.addr2)),
    }
}

/// Replace an RFC 1042 header by its ether-type. AppleTalk AARP and IPX keep
/// the SNAP header and, like everything else, carry the payload length.
fn strip_snap(dst: MacAddr, src: MacAddr, llc: Bytes) -> EtherFrame {
    if llc.len() >= LLC_SNAP_LEN && llc[..RFC1042_SNAP.len()] == RFC1042_SNAP {
        let ether_type = u16::from_be_bytes([llc[6], llc[7]]);
        if ether_type != ethertype::AARP && ether_type != ethertype::IPX {
            return EtherFrame::new(dst, src, ether_type, llc.slice(LLC_SNAP_LEN..));
        }
    }
    EtherFrame::new(dst, src, llc.len() as u16, llc)
}

/// Decapsulate a data frame body
pub fn decap(hdr: &Dot11Header, body: Bytes) -> Result<EtherFrame, Counter> {
    if body.len() < LLC_SNAP_LEN {
        return Err(Counter::Decap);
    }
    let (dst, src) = data_addresses(hdr);
    Ok(strip_snap(dst, src, body))
}

/// Split one `DA SA LEN payload` frame off the front of `buf`
fn split_8023(buf: &mut Bytes, short: Counter, overrun: Counter) -> Result<EtherFrame, Counter> {
    if buf.len() < ETHER_HDR_LEN {
        return Err(short);
    }
    let len = u16::from_be_bytes([buf[12], buf[13]]) as usize;
    if len < LLC_SNAP_LEN {
        return Err(short);
    }
    if ETHER_HDR_LEN + len > buf.len() {
        return Err(overrun);
    }

    let mut frame = buf.split_to(ETHER_HDR_LEN + len);
    let hdr = frame.split_to(ETHER_HDR_LEN);
    let dst = MacAddr::from_slice(&hdr[0..6]).ok_or(short)?;
    let src = MacAddr::from_slice(&hdr[6..12]).ok_or(short)?;
    Ok(strip_snap(dst, src, frame))
}

fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Iterator over the sub-frames of an A-MSDU
///
/// Sub-frames are padded to four bytes except the last. An error ends the
/// iteration; sub-frames yielded before it stay valid.
#[derive(Debug, Clone)]
pub struct Amsdu {
    buf: Bytes,
    done: bool,
}

pub fn amsdu(body: Bytes) -> Amsdu {
    Amsdu {
        buf: body,
        done: false,
    }
}

impl Iterator for Amsdu {
    type Item = Result<EtherFrame, Counter>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.buf.is_empty() {
            return None;
        }

        let before = self.buf.len();
        let frame = match split_8023(&mut self.buf, Counter::AmsduTooShort, Counter::AmsduLength) {
            Ok(frame) => frame,
            Err(counter) => {
                self.done = true;
                return Some(Err(counter));
            }
        };

        if !self.buf.is_empty() {
            let pad = pad4(before - self.buf.len());
            // the last sub-frame carries no padding
            if self.buf.len() <= pad {
                self.done = true;
                return Some(Err(Counter::AmsduTooShort));
            }
            self.buf.advance(pad);
        }
        Some(Ok(frame))
    }
}

/// Unpack a fast-frame tunnel; `None` when `frame` is not one
pub fn decap_fastframe(frame: &EtherFrame) -> Option<Result<[EtherFrame; 2], Counter>> {
    if frame.ether_type != ethertype::FAST_FRAME {
        return None;
    }
    Some(split_fastframe(frame.payload.clone()))
}

fn split_fastframe(mut buf: Bytes) -> Result<[EtherFrame; 2], Counter> {
    if buf.len() < FF_TAG_LEN + ETHER_HDR_LEN + LLC_SNAP_LEN {
        return Err(Counter::FastFrame);
    }
    let tag = buf.get_u32_le();
    if tag & FF_PROTO_MASK != FF_PROTO_L2TUNNEL {
        log::debug!("Unsupported fast-frame tunnel protocol {}", tag & FF_PROTO_MASK);
        return Err(Counter::FastFrame);
    }

    let before = buf.len();
    let first = split_8023(&mut buf, Counter::FastFrame, Counter::FastFrame)?;
    let pad = pad4(before - buf.len()).min(buf.len());
    buf.advance(pad);
    let second = split_8023(&mut buf, Counter::FastFrame, Counter::FastFrame)?;
    Ok([first, second])
}

/// Broadcast frame announcing a newly associated station to layer-2 bridges
pub fn l2_update_frame(station: MacAddr) -> EtherFrame {
    EtherFrame::new(
        MacAddr::BROADCAST,
        station,
        L2_UPDATE_XID.len() as u16,
        Bytes::from_static(&L2_UPDATE_XID),
    )
}

impl RxEngine {
    /// Decapsulate a complete data frame and deliver what the port admits
    pub(crate) fn deliver_data(
        &mut self,
        frame: Bytes,
        id: PeerId,
        peer: &Arc<PeerDescriptor>,
        meta: RxMeta,
        host: &mut dyn RxHost,
    ) -> Verdict {
        let hdr = Dot11Header::parse(&frame).map_err(|_| Counter::Decap)?;
        let body = frame.slice(hdr.len..);
        let (ht, fast_frames) = {
            let assoc = peer.assoc.lock();
            (
                assoc.ht.is_some(),
                assoc.ath_caps.map_or(false, |caps| caps.fast_frames()),
            )
        };

        let frames: Vec<Result<EtherFrame, Counter>> = if hdr.is_amsdu() && ht && self.config.ht.amsdu {
            amsdu(body).collect()
        } else {
            let frame = match decap(&hdr, body) {
                Ok(frame) => frame,
                Err(counter) => {
                    peer.link.lock().stats.rx_decap += 1;
                    return Err(counter);
                }
            };
            match decap_fastframe(&frame) {
                Some(split) if self.config.general.fast_frames && fast_frames => match split {
                    Ok(pair) => pair.into_iter().map(Ok).collect(),
                    Err(counter) => vec![Err(counter)],
                },
                _ => vec![Ok(frame)],
            }
        };

        let mut delivered = 0;
        let mut dropped = None;
        for item in frames {
            match item.and_then(|frame| self.admit(&frame, peer, meta.decrypted).map(|()| frame)) {
                Ok(frame) => {
                    host.deliver(frame);
                    self.stats.incr(Counter::Delivered);
                    delivered += 1;
                }
                Err(counter) => {
                    let mut link = peer.link.lock();
                    match counter {
                        Counter::Unauthorized | Counter::Unencrypted => link.stats.rx_unauth += 1,
                        _ => link.stats.rx_decap += 1,
                    }
                    self.stats.incr(counter);
                    dropped = Some(counter);
                }
            }
        }

        match (delivered, dropped) {
            (0, Some(counter)) => {
                log::debug!("Nothing delivered from {} ({}): {:?}", peer.address(), id, counter);
                Ok(RxOutcome::Discarded(counter))
            }
            (n, _) => Ok(RxOutcome::Delivered(n)),
        }
    }

    /// Port policy: only EAPOL passes an unauthorized port, and when
    /// unencrypted traffic is refused only EAPOL may arrive in the clear.
    fn admit(&self, frame: &EtherFrame, peer: &PeerDescriptor, decrypted: bool) -> Result<(), Counter> {
        if frame.is_eapol() {
            return Ok(());
        }
        if !peer.is_authorized() {
            return Err(Counter::Unauthorized);
        }
        if self.config.security.drop_unencrypted && !decrypted {
            return Err(Counter::Unencrypted);
        }
        Ok(())
    }
}
