//! In-process partitioned log implementing [`Channel`].
//!
//! Every topic is split into a fixed number of partitions, each an
//! append-only vector of records. Consumer groups keep a committed offset per
//! partition and an owner per partition; a member claims every partition that
//! has no owner whenever it polls, so partitions released by a closed or
//! dropped member fail over to the remaining members and resume from the
//! committed offset.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_core::topics::OffsetReset;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{partition_for, Channel, ChannelError, Record, RecordMetadata, Subscription};
use crate::config::ChannelConfig;

// ---------------------------------------------------------------------------
// Shared log state
// ---------------------------------------------------------------------------

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

#[derive(Default)]
struct GroupState {
    /// Next offset to read, per partition.
    committed: HashMap<u32, u64>,
    /// Member id owning each partition.
    owners: HashMap<u32, u64>,
}

#[derive(Default)]
struct LogState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<(String, String), GroupState>,
}

fn new_topic(partitions: u32) -> Vec<Vec<StoredRecord>> {
    (0..partitions.max(1)).map(|_| Vec::new()).collect()
}

struct Shared {
    partitions: u32,
    state: Mutex<LogState>,
    /// Signalled on every append and every partition release.
    changed: Notify,
    available: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    send_attempts: AtomicUsize,
    next_member: AtomicU64,
}

// ---------------------------------------------------------------------------
// InMemoryChannel
// ---------------------------------------------------------------------------

/// In-process [`Channel`]. Cloning yields another handle to the same log.
#[derive(Clone)]
pub struct InMemoryChannel {
    shared: Arc<Shared>,
}

impl InMemoryChannel {
    /// Create a channel whose topics have `partitions` partitions each.
    pub fn new(partitions: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(LogState::default()),
                changed: Notify::new(),
                available: AtomicBool::new(true),
                send_delay: Mutex::new(None),
                send_attempts: AtomicUsize::new(0),
                next_member: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.partitions)
    }

    pub fn partitions(&self) -> u32 {
        self.shared.partitions
    }

    /// Simulate the broker going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Delay every send by `delay` before it is accepted or rejected.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        *self.shared.send_delay.lock() = delay;
    }

    /// Number of send calls that reached the channel, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.shared.send_attempts.load(Ordering::SeqCst)
    }

    /// Every record of `topic`, ordered by partition then offset.
    pub fn records(&self, topic: &str) -> Vec<Record> {
        let state = self.shared.state.lock();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, stored)| Record {
                    topic: topic.to_string(),
                    partition: partition as u32,
                    offset: offset as u64,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                })
            })
            .collect()
    }

    /// The group's committed position (next offset to read) on `partition`.
    pub fn committed_offset(&self, topic: &str, group_id: &str, partition: u32) -> Option<u64> {
        let state = self.shared.state.lock();
        state
            .groups
            .get(&(topic.to_string(), group_id.to_string()))
            .and_then(|group| group.committed.get(&partition).copied())
    }
}

#[async_trait]
impl Channel for InMemoryChannel {
    async fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Result<RecordMetadata, ChannelError> {
        self.shared.send_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.shared.send_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(ChannelError::Unavailable(
                "broker is not reachable".to_string(),
            ));
        }

        let metadata = {
            let mut state = self.shared.state.lock();
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| new_topic(self.shared.partitions));
            let partition = partition_for(key, log.len() as u32);
            let records = &mut log[partition as usize];
            records.push(StoredRecord {
                key: key.to_string(),
                payload,
            });
            RecordMetadata {
                partition,
                offset: (records.len() - 1) as u64,
            }
        };

        self.shared.changed.notify_waiters();
        Ok(metadata)
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        offset_reset: OffsetReset,
    ) -> Result<Box<dyn Subscription>, ChannelError> {
        let member_id = self.shared.next_member.fetch_add(1, Ordering::SeqCst);
        let mut subscription = MemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            member_id,
            offset_reset,
            positions: BTreeMap::new(),
            cursor: 0,
            closed: false,
        };
        {
            let mut state = self.shared.state.lock();
            subscription.claim_unowned(&mut state);
        }
        tracing::debug!(
            topic,
            group_id,
            member_id,
            partitions = ?subscription.assignment(),
            "Consumer group member joined"
        );
        Ok(Box::new(subscription))
    }
}

// ---------------------------------------------------------------------------
// MemorySubscription
// ---------------------------------------------------------------------------

/// Consumer-group member of an [`InMemoryChannel`].
///
/// Dropping a subscription without closing it releases its partitions the
/// same way a crashed consumer's session would expire.
pub struct MemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group_id: String,
    member_id: u64,
    offset_reset: OffsetReset,
    /// In-memory read position per owned partition.
    positions: BTreeMap<u32, u64>,
    cursor: usize,
    closed: bool,
}

impl MemorySubscription {
    fn group_key(&self) -> (String, String) {
        (self.topic.clone(), self.group_id.clone())
    }

    /// Take every partition that currently has no owner in the group.
    fn claim_unowned(&mut self, state: &mut LogState) {
        let LogState { topics, groups } = state;
        let log = topics
            .entry(self.topic.clone())
            .or_insert_with(|| new_topic(self.shared.partitions));
        let group = groups.entry(self.group_key()).or_default();

        for partition in 0..log.len() as u32 {
            if group.owners.contains_key(&partition) {
                continue;
            }
            group.owners.insert(partition, self.member_id);
            let start = match group.committed.get(&partition) {
                Some(&offset) => offset,
                None => match self.offset_reset {
                    OffsetReset::Earliest => 0,
                    OffsetReset::Latest => log[partition as usize].len() as u64,
                },
            };
            self.positions.insert(partition, start);
        }
    }

    /// Return the next unread record, visiting owned partitions round-robin.
    fn try_next(&mut self) -> Result<Option<Record>, ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }

        let shared = Arc::clone(&self.shared);
        let mut state = shared.state.lock();
        self.claim_unowned(&mut state);

        let Some(log) = state.topics.get(&self.topic) else {
            return Ok(None);
        };
        let assigned: Vec<u32> = self.positions.keys().copied().collect();
        if assigned.is_empty() {
            return Ok(None);
        }

        for step in 0..assigned.len() {
            let partition = assigned[(self.cursor + step) % assigned.len()];
            let position = self.positions[&partition];
            if let Some(stored) = log[partition as usize].get(position as usize) {
                let record = Record {
                    topic: self.topic.clone(),
                    partition,
                    offset: position,
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                };
                self.positions.insert(partition, position + 1);
                self.cursor = (self.cursor + step + 1) % assigned.len();
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        {
            let mut state = self.shared.state.lock();
            if let Some(group) = state.groups.get_mut(&self.group_key()) {
                group.owners.retain(|_, owner| *owner != self.member_id);
            }
        }
        self.positions.clear();
        self.shared.changed.notify_waiters();
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn assignment(&self) -> Vec<u32> {
        self.positions.keys().copied().collect()
    }

    async fn poll(&mut self) -> Result<Record, ChannelError> {
        let shared = Arc::clone(&self.shared);
        loop {
            // Register interest before checking so an append between the
            // check and the await is not missed.
            let changed = shared.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(record) = self.try_next()? {
                return Ok(record);
            }
            changed.await;
        }
    }

    async fn commit(&mut self, record: &Record) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let mut state = self.shared.state.lock();
        let group = state.groups.entry(self.group_key()).or_default();
        if record.topic != self.topic
            || group.owners.get(&record.partition) != Some(&self.member_id)
        {
            return Err(ChannelError::NotAssigned {
                topic: record.topic.clone(),
                partition: record.partition,
            });
        }
        group.committed.insert(record.partition, record.offset + 1);
        Ok(())
    }

    async fn close(&mut self) {
        let partitions = self.assignment();
        self.release();
        tracing::debug!(
            topic = %self.topic,
            group_id = %self.group_id,
            member_id = self.member_id,
            ?partitions,
            "Consumer group member released its partitions"
        );
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
