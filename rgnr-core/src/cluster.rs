// vim: tw=80
//! The two-sided Started/Done handshake, and the link to the peer SP
//!
//! Each coordinated operation owns one [`Handshake`].  A side only ever
//! changes its own flags, and tells the peer about every change by message.
//! The protocol is
//!
//! ```text
//! Idle --start--> LocalStarted --peer Started--> BothStarted
//! BothStarted --Active sets Done--> LocalDone
//! LocalDone --peer complete--> Cleared
//! ```
//!
//! The Passive side sets Done only after it sees the peer's Done.  The peer
//! counts as complete once it is Done, or once it has already cleared both of
//! its flags while we were Done.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::channel::mpsc;
#[cfg(test)] use mockall::automock;
use serde_derive::{Deserialize, Serialize};

use crate::{
    condition::LifecycleState,
    types::*,
};

/// An operation that both SPs must agree on before it advances
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum ClusterOp {
    EmehDegraded,
    EmehPaco,
    EmehIncrease,
    EmehRestore,
    /// Stop issuing write I/O while rebuild logging changes
    Quiesce,
}

/// One side's view of an operation
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlagPair {
    pub started: bool,
    pub done: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeState {
    Idle,
    LocalStarted,
    BothStarted,
    LocalDone,
    /// Both sides have finished.  Reported once, after which the handshake is
    /// Idle again.
    Cleared,
}

/// Which SP of the pair this is
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SpRole {
    Active,
    Passive,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Handshake {
    local: FlagPair,
    peer: FlagPair,
}

impl Handshake {
    pub fn local(&self) -> FlagPair {
        self.local
    }

    pub fn peer(&self) -> FlagPair {
        self.peer
    }

    pub fn state(&self) -> HandshakeState {
        match (self.local, self.peer.started) {
            (FlagPair{done: true, ..}, _) => HandshakeState::LocalDone,
            (FlagPair{started: false, ..}, _) => HandshakeState::Idle,
            (_, false) => HandshakeState::LocalStarted,
            (_, true) => HandshakeState::BothStarted,
        }
    }

    /// Set the local Started flag.  Returns the flags to send to the peer.
    pub fn start(&mut self) -> FlagPair {
        self.local.started = true;
        self.local
    }

    /// Drop out of the operation.  Returns the flags to send to the peer.
    pub fn abandon(&mut self) -> FlagPair {
        self.local = FlagPair::default();
        self.local
    }

    /// Record flags received from the peer
    pub fn peer_update(&mut self, flags: FlagPair) {
        self.peer = flags;
    }

    /// The peer has started an operation that we haven't joined yet
    pub fn peer_requested(&self) -> bool {
        self.peer.started && !self.peer.done && !self.local.started
    }

    fn peer_complete(&self) -> bool {
        self.peer.done || (self.local.done && !self.peer.started)
    }

    /// Make whatever progress the protocol allows.
    ///
    /// Returns the resulting state, plus new local flags that must be sent to
    /// the peer, if they changed.
    pub fn advance(&mut self, role: SpRole, peer_present: bool)
        -> (HandshakeState, Option<FlagPair>)
    {
        if !self.local.started {
            return (HandshakeState::Idle, None);
        }
        if !peer_present {
            // Nobody to wait for
            self.local = FlagPair::default();
            self.peer = FlagPair::default();
            return (HandshakeState::Cleared, None);
        }
        let mut changed = false;
        if !self.local.done && self.peer.started {
            let may_finish = match role {
                SpRole::Active => true,
                SpRole::Passive => self.peer.done,
            };
            if may_finish {
                self.local.done = true;
                changed = true;
            }
        }
        if self.local.done && self.peer_complete() {
            self.local = FlagPair::default();
            return (HandshakeState::Cleared, Some(self.local));
        }
        (self.state(), if changed { Some(self.local) } else { None })
    }
}

/// One handshake per coordinated operation
#[derive(Clone, Debug, Default)]
pub struct ClusterFlags(HashMap<ClusterOp, Handshake>);

impl ClusterFlags {
    pub fn get(&self, op: ClusterOp) -> Handshake {
        self.0.get(&op).copied().unwrap_or_default()
    }

    pub fn get_mut(&mut self, op: ClusterOp) -> &mut Handshake {
        self.0.entry(op).or_default()
    }
}

/// Everything one SP tells the other about a raid group
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PeerMessage {
    /// The sender's flags for `op` changed
    Flags { op: ClusterOp, flags: FlagPair },
    /// The sender's current view of failed positions
    FailedPositions(PositionBitmask),
    /// The sender persisted new non-paged metadata.  Reload it.
    NonPagedChanged,
    /// Lift the quiesce requested by the sender
    Unquiesce,
    /// Move to this lifecycle state
    Lifecycle(LifecycleState),
}

/// Point-to-point, ordered, lossless delivery to the peer SP
#[cfg_attr(test, automock)]
pub trait PeerLink: Send + Sync {
    /// Is the peer SP up?
    fn is_present(&self) -> bool;

    /// Queue a message for the peer.  Messages to an absent peer are dropped.
    fn send(&self, msg: PeerMessage);

    /// Next message received from the peer, if any
    fn try_recv(&self) -> Option<PeerMessage>;
}

/// A `PeerLink` for a raid group with no peer SP
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPeer;

impl PeerLink for NoPeer {
    fn is_present(&self) -> bool {
        false
    }

    fn send(&self, _msg: PeerMessage) {}

    fn try_recv(&self) -> Option<PeerMessage> {
        None
    }
}

/// One end of an in-process peer link
#[derive(Debug)]
pub struct ChannelPeer {
    tx: mpsc::UnboundedSender<PeerMessage>,
    rx: Mutex<mpsc::UnboundedReceiver<PeerMessage>>,
    present: Arc<AtomicBool>,
}

impl ChannelPeer {
    /// Sever the link, as if the other SP went down.  Affects both ends.
    pub fn disconnect(&self) {
        self.present.store(false, Ordering::Release);
    }

    /// Restore a severed link
    pub fn reconnect(&self) {
        self.present.store(true, Ordering::Release);
    }
}

impl PeerLink for ChannelPeer {
    fn is_present(&self) -> bool {
        self.present.load(Ordering::Acquire)
    }

    fn send(&self, msg: PeerMessage) {
        if self.is_present() {
            tracing::trace!(?msg, "send to peer");
            // The receiver lives as long as the other end, which may already
            // be dropped.
            let _ = self.tx.unbounded_send(msg);
        }
    }

    fn try_recv(&self) -> Option<PeerMessage> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.try_next() {
            Ok(Some(msg)) => Some(msg),
            // Closed, or nothing pending
            Ok(None) | Err(_) => None
        }
    }
}

/// Create two connected ends of an in-process peer link
pub fn channel_pair() -> (ChannelPeer, ChannelPeer) {
    let (tx_a, rx_b) = mpsc::unbounded();
    let (tx_b, rx_a) = mpsc::unbounded();
    let present = Arc::new(AtomicBool::new(true));
    let a = ChannelPeer {
        tx: tx_a,
        rx: Mutex::new(rx_a),
        present: present.clone()
    };
    let b = ChannelPeer {
        tx: tx_b,
        rx: Mutex::new(rx_b),
        present
    };
    (a, b)
}

// LCOV_EXCL_STOP
