//! Partitioned, ordered, at-least-once message channel.
//!
//! The pipeline only depends on the narrow [`Channel`] / [`Subscription`]
//! interface defined here:
//!
//! - records are appended to a topic partition chosen from their key, so
//!   records sharing a key keep their relative order;
//! - consumers attach as a group and each partition is owned by at most one
//!   group member at a time;
//! - a member's read position only becomes durable once it is committed, so
//!   anything read but not committed is delivered again to whichever member
//!   owns the partition next.
//!
//! [`InMemoryChannel`] is the in-process implementation.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use herald_core::topics::OffsetReset;

pub use memory::InMemoryChannel;

/// One record read from a topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Where a sent record was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: u32,
    pub offset: u64,
}

/// Error type for channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The broker could not be reached or refused the request.
    #[error("Channel unavailable: {0}")]
    Unavailable(String),

    /// A send did not complete within the allotted time.
    #[error("Channel send timed out after {0:?}")]
    Timeout(Duration),

    /// The subscription was closed and can no longer poll or commit.
    #[error("Subscription closed")]
    Closed,

    /// A commit referenced a partition this member does not own.
    #[error("Partition {partition} of '{topic}' is not assigned to this member")]
    NotAssigned { topic: String, partition: u32 },
}

/// Producer-side view of the channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Append `payload` to `topic` on the partition selected by `key`.
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<RecordMetadata, ChannelError>;

    /// Join `group_id` on `topic` and take ownership of unowned partitions.
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// Consumer-group member attached to one topic.
#[async_trait]
pub trait Subscription: Send {
    /// Partitions currently owned by this member.
    fn assignment(&self) -> Vec<u32>;

    /// Wait for the next record on any owned partition.
    ///
    /// Records of one partition are returned in offset order.
    async fn poll(&mut self) -> Result<Record, ChannelError>;

    /// Make `record` (and everything before it on its partition) the group's
    /// committed position.
    async fn commit(&mut self, record: &Record) -> Result<(), ChannelError>;

    /// Release every owned partition. Further polls return
    /// [`ChannelError::Closed`].
    async fn close(&mut self);
}

/// Stable partition selection for a record key.
///
/// Uses 32-bit FNV-1a so the mapping does not change between processes.
pub fn partition_for(key: &str, partitions: u32) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = key
        .bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u32::from(b)).wrapping_mul(FNV_PRIME));
    hash % partitions.max(1)
}
