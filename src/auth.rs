//! Authentication
//!
//! Open system and shared key, as responder (access point) and initiator
//! (station). Outgoing authentication frames are requested through
//! [`TxRequest::auth`]; for shared-key challenges the transmitter reads the
//! challenge text from the peer descriptor.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::AuthMode;
use crate::element::{walk, ElementKind};
use crate::event::{DiscoveryReason, RxHost, TxRequest};
use crate::frame::{status, MacAddr};
use crate::input::{RxEngine, RxFrame, RxOutcome, Sender, Verdict};
use crate::peers::{AuthState, PeerDescriptor, PeerId, PeerRole};
use crate::state::{NodeState, OpMode};
use crate::stats::Counter;

/// Shared-key challenge text length
pub const CHALLENGE_LEN: usize = 128;

pub const AUTH_ALG_OPEN: u16 = 0;
pub const AUTH_ALG_SHARED: u16 = 1;

/// Transaction sequence numbers
pub const AUTH_SEQ_REQUEST: u16 = 1;
pub const AUTH_SEQ_CHALLENGE: u16 = 2;
pub const AUTH_SEQ_RESPONSE: u16 = 3;
pub const AUTH_SEQ_PASS: u16 = 4;

const AUTH_FIXED_LEN: usize = 6;

/// Fixed fields of an authentication frame body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthBody<'a> {
    pub algorithm: u16,
    pub seq: u16,
    pub status: u16,
    /// Trailing elements (the challenge text)
    pub elements: &'a [u8],
}

impl<'a> AuthBody<'a> {
    pub fn parse(body: &'a [u8]) -> Option<Self> {
        if body.len() < AUTH_FIXED_LEN {
            return None;
        }
        Some(Self {
            algorithm: u16::from_le_bytes([body[0], body[1]]),
            seq: u16::from_le_bytes([body[2], body[3]]),
            status: u16::from_le_bytes([body[4], body[5]]),
            elements: &body[AUTH_FIXED_LEN..],
        })
    }
}

/// Fresh random challenge text
pub fn new_challenge() -> Box<[u8; CHALLENGE_LEN]> {
    let mut challenge = Box::new([0u8; CHALLENGE_LEN]);
    OsRng.fill_bytes(&mut challenge[..]);
    challenge
}

impl RxEngine {
    pub(crate) fn recv_auth(&mut self, rx: &RxFrame<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let body = AuthBody::parse(rx.body()).ok_or(Counter::TooShort)?;
        let addr = rx.sender();

        if self.iface.mode == OpMode::HostAp && !self.config.acl_allows(&addr) {
            log::debug!("Authentication from {} refused by ACL", addr);
            return Err(Counter::Acl);
        }

        match body.algorithm {
            AUTH_ALG_OPEN => self.auth_open(addr, &body, sender, host),
            AUTH_ALG_SHARED => self.auth_shared(addr, &body, sender, host),
            algorithm => {
                log::debug!("Unsupported authentication algorithm {} from {}", algorithm, addr);
                if self.iface.mode == OpMode::HostAp {
                    let peer = sender.known().map(|(id, _)| id);
                    host.send_mgmt(TxRequest::auth(addr, peer, body.seq.wrapping_add(1), status::ALG));
                }
                Err(Counter::AuthUnsupported)
            }
        }
    }

    fn auth_open(&mut self, addr: MacAddr, body: &AuthBody<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        match self.iface.mode {
            OpMode::HostAp => {
                if self.iface.state != NodeState::Run || body.seq != AUTH_SEQ_REQUEST {
                    return Err(Counter::BadAuth);
                }
                if self.config.security.auth_mode == AuthMode::Shared {
                    let peer = sender.known().map(|(id, _)| id);
                    host.send_mgmt(TxRequest::auth(addr, peer, body.seq + 1, status::ALG));
                    return Err(Counter::AuthUnsupported);
                }

                let (id, peer) = self
                    .peers
                    .insert(addr, PeerRole::Station)
                    .map_err(|err| {
                        log::warn!("Cannot admit {}: {}", addr, err);
                        Counter::NoResources
                    })?;
                {
                    let mut assoc = peer.assoc.lock();
                    assoc.auth = AuthState::Authenticated;
                    assoc.challenge = None;
                    if self.port_open_on_auth() {
                        assoc.authorized = true;
                    }
                }
                log::info!("Station {} authenticated (open system)", addr);
                host.send_mgmt(TxRequest::auth(addr, Some(id), AUTH_SEQ_CHALLENGE, status::SUCCESS));
                Ok(RxOutcome::Consumed)
            }
            OpMode::Station => {
                if self.iface.state != NodeState::Auth || body.seq != AUTH_SEQ_CHALLENGE {
                    return Err(Counter::BadAuth);
                }
                let Some((_, peer)) = sender.known() else {
                    return Err(Counter::BadAuth);
                };
                if body.status != status::SUCCESS {
                    self.auth_rejected(addr, peer, body.status, host);
                    return Err(Counter::AuthFail);
                }
                peer.assoc.lock().auth = AuthState::Authenticated;
                log::info!("Authenticated with {} (open system)", addr);
                self.new_state(NodeState::Assoc, host);
                Ok(RxOutcome::Consumed)
            }
            OpMode::AdHoc | OpMode::Monitor => Err(Counter::MgmtDiscard),
        }
    }

    fn auth_shared(&mut self, addr: MacAddr, body: &AuthBody<'_>, sender: &Sender, host: &mut dyn RxHost) -> Verdict {
        let known = sender.known().map(|(id, _)| id);

        if !self.config.security.privacy
            || !matches!(self.config.security.auth_mode, AuthMode::Shared | AuthMode::Auto)
        {
            return self.shared_error(addr, known, body.seq, status::ALG, host);
        }

        // A station takes a rejection as is, challenge or not.
        let rejected = self.iface.mode == OpMode::Station && body.status != status::SUCCESS;

        let challenge = match walk(body.elements).next() {
            None => None,
            Some(Err(_)) if rejected => None,
            Some(Err(_)) => return self.shared_error(addr, known, body.seq, status::CHALLENGE, host),
            Some(Ok(element)) => (element.kind == ElementKind::Challenge).then_some(element.data),
        };
        if !rejected
            && matches!(body.seq, AUTH_SEQ_CHALLENGE | AUTH_SEQ_RESPONSE)
            && challenge.map_or(true, |c| c.len() != CHALLENGE_LEN)
        {
            return self.shared_error(addr, known, body.seq, status::CHALLENGE, host);
        }

        match self.iface.mode {
            OpMode::HostAp => {
                if self.iface.state != NodeState::Run {
                    return Err(Counter::BadAuth);
                }
                match body.seq {
                    AUTH_SEQ_REQUEST => {
                        let (id, peer) = self
                            .peers
                            .insert(addr, PeerRole::Station)
                            .map_err(|err| {
                                log::warn!("Cannot admit {}: {}", addr, err);
                                Counter::NoResources
                            })?;
                        {
                            let mut assoc = peer.assoc.lock();
                            assoc.auth = AuthState::ShareChallengeSent;
                            assoc.challenge = Some(new_challenge());
                        }
                        log::debug!("Shared key challenge sent to {}", addr);
                        host.send_mgmt(TxRequest::auth(addr, Some(id), AUTH_SEQ_CHALLENGE, status::SUCCESS));
                        Ok(RxOutcome::Consumed)
                    }
                    AUTH_SEQ_RESPONSE => {
                        let Some((id, peer)) = sender.known() else {
                            log::debug!("Challenge response from unknown station {}", addr);
                            return Err(Counter::BadAuth);
                        };
                        let matched = {
                            let assoc = peer.assoc.lock();
                            match (&assoc.challenge, challenge) {
                                (Some(sent), Some(got)) => sent[..] == *got,
                                _ => false,
                            }
                        };
                        if !matched {
                            return self.shared_error(addr, Some(id), body.seq, status::CHALLENGE, host);
                        }
                        {
                            let mut assoc = peer.assoc.lock();
                            assoc.auth = AuthState::Authenticated;
                            assoc.challenge = None;
                            if self.port_open_on_auth() {
                                assoc.authorized = true;
                            }
                        }
                        log::info!("Station {} authenticated (shared key)", addr);
                        host.send_mgmt(TxRequest::auth(addr, Some(id), AUTH_SEQ_PASS, status::SUCCESS));
                        Ok(RxOutcome::Consumed)
                    }
                    _ => self.shared_error(addr, known, body.seq, status::SEQUENCE, host),
                }
            }
            OpMode::Station => {
                if self.iface.state != NodeState::Auth {
                    return Err(Counter::BadAuth);
                }
                let Some((id, peer)) = sender.known() else {
                    return Err(Counter::BadAuth);
                };
                if body.status != status::SUCCESS {
                    self.auth_rejected(addr, peer, body.status, host);
                    return Err(Counter::AuthFail);
                }
                match (body.seq, challenge) {
                    (AUTH_SEQ_CHALLENGE, Some(text)) => {
                        let text = <[u8; CHALLENGE_LEN]>::try_from(text).map_err(|_| Counter::BadAuth)?;
                        {
                            let mut assoc = peer.assoc.lock();
                            assoc.auth = AuthState::ShareChallengeSent;
                            assoc.challenge = Some(Box::new(text));
                        }
                        host.send_mgmt(TxRequest::auth(addr, Some(id), AUTH_SEQ_RESPONSE, status::SUCCESS));
                        Ok(RxOutcome::Consumed)
                    }
                    (AUTH_SEQ_PASS, _) => {
                        {
                            let mut assoc = peer.assoc.lock();
                            assoc.auth = AuthState::Authenticated;
                            assoc.challenge = None;
                        }
                        log::info!("Authenticated with {} (shared key)", addr);
                        self.new_state(NodeState::Assoc, host);
                        Ok(RxOutcome::Consumed)
                    }
                    _ => self.shared_error(addr, Some(id), body.seq, status::SEQUENCE, host),
                }
            }
            OpMode::AdHoc | OpMode::Monitor => Err(Counter::MgmtDiscard),
        }
    }

    /// Report a shared-key failure: the access point answers with the
    /// status, a station gives up on the BSS.
    fn shared_error(
        &mut self,
        addr: MacAddr,
        peer: Option<PeerId>,
        seq: u16,
        code: u16,
        host: &mut dyn RxHost,
    ) -> Verdict {
        log::debug!("Shared key authentication with {} failed: status {}", addr, code);
        match self.iface.mode {
            OpMode::HostAp => {
                host.send_mgmt(TxRequest::auth(addr, peer, seq.wrapping_add(1), code));
            }
            OpMode::Station if self.iface.state == NodeState::Auth => {
                self.return_to_discovery(DiscoveryReason::AuthRejected(code), host);
            }
            OpMode::Station | OpMode::AdHoc | OpMode::Monitor => {}
        }
        Err(if code == status::ALG {
            Counter::AuthUnsupported
        } else {
            Counter::BadAuth
        })
    }

    fn auth_rejected(&mut self, addr: MacAddr, peer: &PeerDescriptor, code: u16, host: &mut dyn RxHost) {
        peer.assoc.lock().fails += 1;
        peer.link.lock().stats.rx_auth_fail += 1;
        log::info!("Authentication with {} rejected: status {}", addr, code);
        self.return_to_discovery(DiscoveryReason::AuthRejected(code), host);
    }

    fn port_open_on_auth(&self) -> bool {
        !matches!(self.config.security.auth_mode, AuthMode::Dot1x | AuthMode::Wpa)
    }
}
