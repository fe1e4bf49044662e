//! Fragment reassembly
//!
//! One chain per peer. A chain is extended only by the fragment whose
//! sequence-control value is exactly one past the stored one and whose
//! receiver and transmitter match; anything else discards it.

use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};

use crate::frame::{Dot11Header, MacAddr, FC1_MORE_FRAG, HDR_LEN};
use crate::MAX_FRAME_LEN;

/// Offset of the sequence-control field in the header
const SEQ_CTL_OFFSET: usize = HDR_LEN - 2;

#[derive(Debug)]
pub struct FragmentChain {
    buf: BytesMut,
    seq_ctl: u16,
    addr1: MacAddr,
    addr2: MacAddr,
    started: Instant,
}

impl FragmentChain {
    fn start(hdr: &Dot11Header, frame: &[u8]) -> Self {
        Self {
            buf: BytesMut::from(frame),
            seq_ctl: hdr.seq_ctl,
            addr1: hdr.addr1,
            addr2: hdr.addr2,
            started: Instant::now(),
        }
    }

    fn continues(&self, hdr: &Dot11Header) -> bool {
        hdr.seq_ctl == self.seq_ctl.wrapping_add(1)
            && hdr.addr1 == self.addr1
            && hdr.addr2 == self.addr2
    }

    fn finish(mut self) -> Bytes {
        self.buf[1] &= !FC1_MORE_FRAG;
        self.buf[SEQ_CTL_OFFSET..SEQ_CTL_OFFSET + 2].copy_from_slice(&self.seq_ctl.to_le_bytes());
        self.buf.freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defrag {
    /// Whole frame ready for further processing
    Complete(Bytes),
    /// Fragment stored, more expected
    Pending,
    /// Fragment dropped: no chain to attach it to
    Dropped,
}

#[derive(Debug, Default)]
pub struct Reassembler {
    chain: Option<FragmentChain>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one data frame (header included)
    pub fn push(&mut self, hdr: &Dot11Header, frame: Bytes) -> Defrag {
        let more = hdr.more_frag();
        let fragno = hdr.fragment();

        if !more && fragno == 0 && self.chain.is_none() {
            return Defrag::Complete(frame);
        }

        if self.chain.as_ref().map_or(false, |chain| !chain.continues(hdr)) {
            log::debug!("Discarding fragment chain from {}: out of order", hdr.addr2);
            self.chain = None;
        }

        match self.chain.as_mut() {
            None if fragno != 0 => return Defrag::Dropped,
            None if !more => return Defrag::Complete(frame),
            None => self.chain = Some(FragmentChain::start(hdr, &frame)),
            Some(chain) => {
                let body = frame.get(hdr.len..).unwrap_or(&[]);
                if chain.len() + body.len() > MAX_FRAME_LEN + hdr.len {
                    self.chain = None;
                    return Defrag::Dropped;
                }
                chain.buf.extend_from_slice(body);
                chain.seq_ctl = hdr.seq_ctl;
            }
        }

        if more {
            return Defrag::Pending;
        }

        match self.chain.take() {
            Some(chain) => Defrag::Complete(chain.finish()),
            None => Defrag::Dropped,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.chain.is_some()
    }

    /// Drop a chain at least `max_age` old; returns whether one was dropped
    pub fn expire(&mut self, max_age: Duration) -> bool {
        if self.chain.as_ref().map_or(false, |chain| chain.age() >= max_age) {
            self.chain = None;
            return true;
        }
        false
    }

    pub fn clear(&mut self) {
        self.chain = None;
    }
}
