//
// Copyright 2026 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

//! The packet transform chain. Every stage takes ownership of a
//! [`RawPacket`] and hands it back (possibly rewritten) or consumes it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::*;
use parking_lot::RwLock;
use thiserror::Error;

use crate::rtp::{PacketError, RawPacket, Ssrc};

mod srtp;

pub use srtp::{SrtcpTransformer, SrtpTransformer};

#[derive(Error, Debug, Eq, PartialEq)]
pub enum TransformError {
    #[error("transformer is closed")]
    Closed,
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("authentication failed (ssrc {ssrc}, index {index})")]
    AuthenticationFailed { ssrc: Ssrc, index: u64 },
    #[error("received an unencrypted SRTCP packet")]
    Unencrypted,
    #[error("SRTCP index space exhausted")]
    IndexExhausted,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error(transparent)]
    Packet(#[from] PacketError),
}

/// A stage of the transform chain.
///
/// `transform` runs on packets we're about to send, `reverse_transform` on
/// packets we just received. Returning `Ok(None)` means the packet was consumed
/// and must not travel any further.
pub trait PacketTransformer: Send + Sync {
    fn transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError>;
    fn reverse_transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError>;

    /// Releases whatever the transformer holds. Called exactly once, after the
    /// last call to `transform` or `reverse_transform` has returned.
    fn close(&self) {}
}

// Closes the transformer when the last user lets go of it, so a call that's
// still running never sees a closed context.
struct Installed(Box<dyn PacketTransformer>);

impl Drop for Installed {
    fn drop(&mut self) {
        self.0.close();
    }
}

type Slot = RwLock<Option<Arc<Installed>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    Uninitialized,
    OutboundReady,
    InboundReady,
    BothReady,
    Closed,
}

/// Independent outbound and inbound contexts for one flow. A direction
/// without a context passes packets through untouched.
///
/// All methods take `&self` and may be called from any thread. Once `close`
/// returns, both directions are pass-through for every caller and no new
/// context can be installed.
#[derive(Default)]
pub struct TransformerPair {
    outbound: Slot,
    inbound: Slot,
    closed: AtomicBool,
}

impl TransformerPair {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outbound(
        &self,
        transformer: Box<dyn PacketTransformer>,
    ) -> Result<(), TransformError> {
        self.install(&self.outbound, transformer)
    }

    pub fn set_inbound(
        &self,
        transformer: Box<dyn PacketTransformer>,
    ) -> Result<(), TransformError> {
        self.install(&self.inbound, transformer)
    }

    pub fn clear_outbound(&self) {
        Self::remove(&self.outbound);
    }

    pub fn clear_inbound(&self) {
        Self::remove(&self.inbound);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> PairState {
        if self.is_closed() {
            return PairState::Closed;
        }
        match (self.outbound.read().is_some(), self.inbound.read().is_some()) {
            (false, false) => PairState::Uninitialized,
            (true, false) => PairState::OutboundReady,
            (false, true) => PairState::InboundReady,
            (true, true) => PairState::BothReady,
        }
    }

    pub fn transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        match Self::current(&self.outbound) {
            Some(installed) => installed.0.transform(packet),
            None => Ok(Some(packet)),
        }
    }

    pub fn reverse_transform(
        &self,
        packet: RawPacket,
    ) -> Result<Option<RawPacket>, TransformError> {
        match Self::current(&self.inbound) {
            Some(installed) => installed.0.reverse_transform(packet),
            None => Ok(Some(packet)),
        }
    }

    /// Empties both directions for good. Safe to call more than once and from
    /// several threads. Contexts still in use by another thread are closed
    /// when that thread is done with them.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("closing transformer pair");
        }
        Self::remove(&self.outbound);
        Self::remove(&self.inbound);
    }

    fn install(
        &self,
        slot: &Slot,
        transformer: Box<dyn PacketTransformer>,
    ) -> Result<(), TransformError> {
        let installed = Arc::new(Installed(transformer));
        let previous = {
            let mut slot = slot.write();
            // Checked under the lock so a concurrent close() can't miss us.
            if self.is_closed() {
                return Err(TransformError::Closed);
            }
            slot.replace(installed)
        };
        // Dropped outside the lock; close() may take a while.
        drop(previous);
        Ok(())
    }

    fn remove(slot: &Slot) {
        let previous = slot.write().take();
        drop(previous);
    }

    fn current(slot: &Slot) -> Option<Arc<Installed>> {
        slot.read().clone()
    }
}

impl PacketTransformer for TransformerPair {
    fn transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        TransformerPair::transform(self, packet)
    }

    fn reverse_transform(&self, packet: RawPacket) -> Result<Option<RawPacket>, TransformError> {
        TransformerPair::reverse_transform(self, packet)
    }

    fn close(&self) {
        TransformerPair::close(self)
    }
}
