//! Duplicate detection on sequence-control values

use crate::frame::NUM_TID;

/// Last sequence-control value seen per traffic class, 16 QoS TIDs plus one
/// slot for non-QoS traffic.
#[derive(Debug, Clone, Default)]
pub struct SequenceFilter {
    last: [Option<u16>; NUM_TID + 1],
}

impl SequenceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq_ctl` for `tid`. Returns `false` for a retransmission whose
    /// sequence-control value, compared as a plain integer, is not above the
    /// stored one; the table is left unchanged then.
    pub fn check(&mut self, tid: usize, seq_ctl: u16, retry: bool) -> bool {
        let Some(slot) = self.last.get_mut(tid) else {
            return true;
        };

        if retry {
            if let Some(last) = *slot {
                if seq_ctl <= last {
                    return false;
                }
            }
        }

        *slot = Some(seq_ctl);
        true
    }

    pub fn last(&self, tid: usize) -> Option<u16> {
        self.last.get(tid).copied().flatten()
    }

    pub fn reset(&mut self) {
        self.last = [None; NUM_TID + 1];
    }
}
