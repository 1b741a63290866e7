//! Upcalls: notifications from the namespace cache to an upstream consumer.

mod daemon;
mod sample;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::graph::{Attributes, HandleKey};

pub use daemon::{DaemonHandle, InvalidationDaemon, ShutdownOutcome, TickReport, DEFAULT_SHUTDOWN_GRACE};
pub use sample::sample_one;

/// Attributes an `update` upcall reports as changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedAttrs {
    pub ctime: DateTime<Utc>,
    pub chgtime: DateTime<Utc>,
    pub change: u64,
}

impl From<&Attributes> for ChangedAttrs {
    fn from(attrs: &Attributes) -> Self {
        Self {
            ctime: attrs.ctime,
            chgtime: attrs.chgtime,
            change: attrs.change,
        }
    }
}

/// A single upcall, as delivered by [`ChannelConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upcall {
    Update {
        key: HandleKey,
        changed: ChangedAttrs,
    },
    /// Drop cached attributes for the handle
    Invalidate { key: HandleKey },
    /// Drop cached attributes and release any open state for the handle
    InvalidateClose { key: HandleKey },
}

impl Upcall {
    pub fn key(&self) -> &HandleKey {
        match self {
            Upcall::Update { key, .. } | Upcall::Invalidate { key } | Upcall::InvalidateClose { key } => {
                key
            }
        }
    }
}

impl fmt::Display for Upcall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upcall::Update { key, changed } => write!(f, "update {} (change {})", key, changed.change),
            Upcall::Invalidate { key } => write!(f, "invalidate {}", key),
            Upcall::InvalidateClose { key } => write!(f, "invalidate_close {}", key),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpcallError {
    #[error("upstream consumer is gone")]
    Disconnected,
    #[error("upstream consumer rejected the upcall: {0}")]
    Rejected(String),
}

/// The receiving end of upcalls, typically the filesystem-protocol layer.
#[async_trait]
pub trait UpstreamConsumer: Send + Sync + fmt::Debug {
    async fn update(&self, key: &HandleKey, changed: &ChangedAttrs) -> Result<(), UpcallError>;

    async fn invalidate(&self, key: &HandleKey) -> Result<(), UpcallError>;

    async fn invalidate_close(&self, key: &HandleKey) -> Result<(), UpcallError>;
}

/// Forwards upcalls into a channel.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: flume::Sender<Upcall>,
}

impl ChannelConsumer {
    /// An unbounded consumer and the receiver its upcalls arrive on.
    pub fn unbounded() -> (Self, flume::Receiver<Upcall>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    /// A consumer whose sends wait while `capacity` upcalls are pending.
    pub fn bounded(capacity: usize) -> (Self, flume::Receiver<Upcall>) {
        let (tx, rx) = flume::bounded(capacity);
        (Self { tx }, rx)
    }

    async fn send(&self, upcall: Upcall) -> Result<(), UpcallError> {
        self.tx
            .send_async(upcall)
            .await
            .map_err(|_| UpcallError::Disconnected)
    }
}

#[async_trait]
impl UpstreamConsumer for ChannelConsumer {
    async fn update(&self, key: &HandleKey, changed: &ChangedAttrs) -> Result<(), UpcallError> {
        self.send(Upcall::Update {
            key: *key,
            changed: *changed,
        })
        .await
    }

    async fn invalidate(&self, key: &HandleKey) -> Result<(), UpcallError> {
        self.send(Upcall::Invalidate { key: *key }).await
    }

    async fn invalidate_close(&self, key: &HandleKey) -> Result<(), UpcallError> {
        self.send(Upcall::InvalidateClose { key: *key }).await
    }
}
