//! # dot11-rx
//!
//! Receive-side processing engine for IEEE 802.11 management and data frames.
//!
//! The driver hands every received frame to [`RxEngine::input`] together with
//! its receive metadata and the peer the frame was attributed to. The engine
//! validates the frame against the operating mode and association state,
//! filters duplicates, reassembles fragments, decapsulates payloads into
//! Ethernet-style frames and runs the authentication, association and
//! power-save state machines. Everything that leaves the engine goes through
//! an [`RxHost`].
//!
//! ## Architecture
//!
//! - `frame`: 802.11 header parsing, constants and link-layer frames
//! - `element`: information element walker and classification
//! - `security`: WPA/RSN element parsing and cipher negotiation
//! - `rates`: legacy rate set and HT MCS negotiation
//! - `scan`: beacon/probe response parameter extraction
//! - `sequence`: duplicate detection per traffic class
//! - `fragment`: fragment reassembly
//! - `decap`: data frame decapsulation and delivery policy
//! - `auth`: open and shared-key authentication
//! - `assoc`: association, reassociation and teardown
//! - `powersave`: power-save buffering and PS-Poll handling
//! - `input`: frame dispatcher
//! - `peers`: the peer table
//! - `state`: local interface state
//! - `stats`: discard and event counters
//! - `event`: outbound interface
//! - `config`: engine configuration

pub mod assoc;
pub mod auth;
pub mod config;
pub mod decap;
pub mod element;
pub mod event;
pub mod fragment;
pub mod frame;
pub mod input;
pub mod peers;
pub mod powersave;
pub mod rates;
pub mod scan;
pub mod security;
pub mod sequence;
pub mod state;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use crate::{
    config::{ConfigManager, EngineConfig},
    event::{LifecycleEvent, Outbound, PsDelivery, RxHost, TxRequest},
    frame::{Dot11Header, EtherFrame, MacAddr},
    input::{RxEngine, RxMeta, RxOutcome, RxPeer},
    peers::{PeerDescriptor, PeerId, PeerRole, PeerTable},
    scan::ScanEntry,
    state::{NodeState, OpMode, PhyMode},
    stats::{Counter, Stats, StatsSnapshot},
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Dot11Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Peer table is full")]
    TableFull,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Dot11Error>;

/// Wire protocol version carried in the frame control field.
pub const PROTOCOL_VERSION: u8 = 0;

/// Largest MSDU the engine will reassemble or decapsulate.
pub const MAX_FRAME_LEN: usize = 7935;

pub fn init_logging() {
    env_logger::init();
}
