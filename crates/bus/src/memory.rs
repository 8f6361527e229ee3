//! In-process candidate bus.
//!
//! Same delivery contract as the file bus: consumer groups share a cursor,
//! deliveries stay in flight until acked, and nacked or abandoned deliveries
//! are handed out again. Used for single-process deployments and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::fact::CandidateFact;
use crate::traits::{BusError, CandidateConsumer, CandidatePublisher, Delivery};

#[derive(Default)]
struct GroupState {
    /// Next never-delivered offset
    cursor: u64,
    /// Offsets to hand out again, lowest first
    redeliver: BTreeSet<u64>,
    /// Offset -> member currently holding it
    in_flight: HashMap<u64, u64>,
}

#[derive(Default)]
struct State {
    log: Vec<Vec<u8>>,
    groups: HashMap<String, GroupState>,
    next_member: u64,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Shared in-memory log with consumer groups.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Join a consumer group. A new group starts at the beginning of the log
    /// when `from_beginning` is set, otherwise at its end.
    pub fn subscribe(&self, group: &str, from_beginning: bool) -> MemoryConsumer {
        let mut state = self.inner.state.lock();
        let log_len = state.log.len() as u64;
        state.groups.entry(group.to_string()).or_insert_with(|| GroupState {
            cursor: if from_beginning { 0 } else { log_len },
            ..Default::default()
        });
        let member = state.next_member;
        state.next_member += 1;

        MemoryConsumer {
            inner: Arc::clone(&self.inner),
            group: group.to_string(),
            member,
        }
    }

    /// Number of published messages.
    pub fn len(&self) -> usize {
        self.inner.state.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every published fact that decodes, in publish order.
    pub fn published(&self) -> Vec<CandidateFact> {
        self.inner
            .state
            .lock()
            .log
            .iter()
            .filter_map(|payload| CandidateFact::decode(payload).ok())
            .collect()
    }

    /// Append a raw payload, bypassing the schema.
    pub fn publish_raw(&self, payload: Vec<u8>) {
        self.inner.state.lock().log.push(payload);
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl CandidatePublisher for MemoryBus {
    async fn publish_batch(&self, facts: &[CandidateFact]) -> Result<(), BusError> {
        if facts.is_empty() {
            return Ok(());
        }
        let encoded = facts
            .iter()
            .map(CandidateFact::encode)
            .collect::<Result<Vec<_>, _>>()?;
        self.inner.state.lock().log.extend(encoded);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

/// Member of a consumer group on a [`MemoryBus`].
pub struct MemoryConsumer {
    inner: Arc<Inner>,
    group: String,
    member: u64,
}

impl MemoryConsumer {
    fn try_claim(&self) -> Option<Delivery> {
        let mut state = self.inner.state.lock();
        let State { log, groups, .. } = &mut *state;
        let group = groups.get_mut(&self.group)?;

        let offset = match group.redeliver.pop_first() {
            Some(offset) => offset,
            None if (group.cursor as usize) < log.len() => {
                let offset = group.cursor;
                group.cursor += 1;
                offset
            }
            None => return None,
        };
        group.in_flight.insert(offset, self.member);

        Some(Delivery {
            partition: 0,
            offset,
            next_offset: offset + 1,
            payload: log[offset as usize].clone(),
        })
    }

    fn release(&self, offset: u64, redeliver: bool) {
        let mut state = self.inner.state.lock();
        if let Some(group) = state.groups.get_mut(&self.group) {
            if group.in_flight.remove(&offset).is_some() && redeliver {
                group.redeliver.insert(offset);
            }
        }
    }
}

#[async_trait]
impl CandidateConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        loop {
            // Register before checking so a publish in between still wakes us
            let notified = self.inner.notify.notified();
            if let Some(delivery) = self.try_claim() {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        self.release(delivery.offset, false);
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        self.release(delivery.offset, true);
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        // Whatever this member held unacked goes back to the group
        let mut state = self.inner.state.lock();
        if let Some(group) = state.groups.get_mut(&self.group) {
            let held: Vec<u64> = group
                .in_flight
                .iter()
                .filter(|(_, member)| **member == self.member)
                .map(|(offset, _)| *offset)
                .collect();
            for offset in held {
                group.in_flight.remove(&offset);
                group.redeliver.insert(offset);
            }
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }
}
