//! Durable file-backed candidate bus.
//!
//! Layout under the bus directory:
//! - `<topic>-<partition>.log`: append-only JSON lines, one fact per line
//! - `<topic>-<partition>.<group>.offset`: byte offset committed by a consumer group
//!
//! A batch is written and `fsync`ed before `publish_batch` returns. Offsets are
//! replaced atomically (write to a temp file, sync, rename), so a crash leaves
//! either the old or the new commit, never a torn one.

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::fact::{CandidateFact, ACCOUNT_LIQUIDATION_CANDIDATES};
use crate::traits::{BusError, CandidateConsumer, CandidatePublisher, Delivery};

/// Default partition count for a fresh bus.
pub const DEFAULT_PARTITIONS: u32 = 4;

/// Default consumer group, shared by all executors.
pub const DEFAULT_GROUP: &str = "liquidators";

/// Where a bus lives and how it is partitioned.
#[derive(Debug, Clone)]
pub struct FileBusConfig {
    pub dir: PathBuf,
    pub topic: String,
    pub partitions: u32,
}

impl FileBusConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            topic: ACCOUNT_LIQUIDATION_CANDIDATES.to_string(),
            partitions: DEFAULT_PARTITIONS,
        }
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions.max(1);
        self
    }
}

/// Consumer group membership options.
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub group: String,
    /// Partitions this member reads; `None` means all
    pub partitions: Option<Vec<u32>>,
    /// Start at the earliest message when the group has no commit yet
    pub from_beginning: bool,
    /// Ignore commits and re-read everything retained
    pub replay: bool,
    /// Sleep between polls when every assigned partition is drained
    pub poll_interval: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            group: DEFAULT_GROUP.to_string(),
            partitions: None,
            from_beginning: true,
            replay: false,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Stable partition for an account (FNV-1a over the address bytes).
pub fn partition_for(account: &Address, partitions: u32) -> u32 {
    const FNV_OFFSET: u32 = 0x811c_9dc5;
    const FNV_PRIME: u32 = 0x0100_0193;

    let hash = account
        .as_slice()
        .iter()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME));
    hash % partitions.max(1)
}

/// Producer handle and consumer factory for one topic directory.
pub struct FileBus {
    config: FileBusConfig,
    /// Serializes appends from this process
    write_lock: Mutex<()>,
}

impl FileBus {
    /// Open (creating if needed) the bus directory and partition logs.
    pub async fn open(config: FileBusConfig) -> Result<Self, BusError> {
        fs::create_dir_all(&config.dir).await?;
        for partition in 0..config.partitions {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path(&config, partition))
                .await?;
        }

        info!(
            dir = %config.dir.display(),
            topic = %config.topic,
            partitions = config.partitions,
            "Candidate bus opened"
        );

        Ok(Self {
            config,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &FileBusConfig {
        &self.config
    }

    /// Join a consumer group.
    pub async fn subscribe(&self, options: ConsumerOptions) -> Result<FileConsumer, BusError> {
        let assigned = match &options.partitions {
            Some(list) if !list.is_empty() => list.clone(),
            _ => (0..self.config.partitions).collect(),
        };

        let mut partitions = BTreeMap::new();
        for partition in assigned {
            if partition >= self.config.partitions {
                return Err(BusError::UnknownPartition(partition));
            }
            let log = log_path(&self.config, partition);
            let committed = if options.replay {
                None
            } else {
                read_offset(&offset_path(&self.config, partition, &options.group)).await?
            };
            let start = match committed {
                Some(offset) => offset,
                None if options.replay || options.from_beginning => 0,
                None => fs::metadata(&log).await?.len(),
            };

            debug!(partition, start, committed = ?committed, "Partition assigned");
            partitions.insert(
                partition,
                PartitionCursor {
                    log,
                    offset_file: offset_path(&self.config, partition, &options.group),
                    read_pos: start,
                    committed: start,
                },
            );
        }

        info!(
            group = %options.group,
            partitions = ?partitions.keys().collect::<Vec<_>>(),
            replay = options.replay,
            "Consumer subscribed"
        );

        Ok(FileConsumer {
            partitions,
            poll_interval: options.poll_interval,
            next_partition: 0,
        })
    }
}

#[async_trait]
impl CandidatePublisher for FileBus {
    async fn publish_batch(&self, facts: &[CandidateFact]) -> Result<(), BusError> {
        if facts.is_empty() {
            return Ok(());
        }

        // Encode everything before touching any log
        let mut by_partition: BTreeMap<u32, Vec<u8>> = BTreeMap::new();
        for fact in facts {
            let line = fact.encode()?;
            let buf = by_partition
                .entry(partition_for(&fact.account, self.config.partitions))
                .or_default();
            buf.extend_from_slice(&line);
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut written = Vec::with_capacity(by_partition.len());
        for (partition, lines) in by_partition {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path(&self.config, partition))
                .await?;
            file.write_all(&lines).await?;
            written.push(file);
        }
        for file in written {
            file.sync_data().await?;
        }

        debug!(count = facts.len(), topic = %self.config.topic, "Published candidate batch");
        Ok(())
    }
}

#[derive(Debug)]
struct PartitionCursor {
    log: PathBuf,
    offset_file: PathBuf,
    /// Next byte to hand out
    read_pos: u64,
    /// Last committed byte offset
    committed: u64,
}

#[derive(Serialize, Deserialize)]
struct OffsetRecord {
    offset: u64,
}

/// One consumer-group member reading its assigned partitions round-robin.
#[derive(Debug)]
pub struct FileConsumer {
    partitions: BTreeMap<u32, PartitionCursor>,
    poll_interval: Duration,
    next_partition: usize,
}

impl FileConsumer {
    /// Committed offset for an assigned partition.
    pub fn committed(&self, partition: u32) -> Option<u64> {
        self.partitions.get(&partition).map(|cursor| cursor.committed)
    }

    /// Read one complete line at `pos`, returning it with the position after it.
    /// A trailing partial line (writer mid-append) counts as nothing yet.
    async fn read_line_at(log: &Path, pos: u64) -> Result<Option<(Vec<u8>, u64)>, BusError> {
        let mut file = File::open(log).await?;
        if file.metadata().await?.len() <= pos {
            return Ok(None);
        }
        file.seek(SeekFrom::Start(pos)).await?;

        let mut reader = BufReader::new(file);
        let mut line = Vec::new();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 || line.last() != Some(&b'\n') {
            return Ok(None);
        }
        line.pop();
        Ok(Some((line, pos + read as u64)))
    }

    async fn poll_once(&mut self) -> Result<Option<Delivery>, BusError> {
        let ids: Vec<u32> = self.partitions.keys().copied().collect();
        for step in 0..ids.len() {
            let idx = (self.next_partition + step) % ids.len();
            let partition = ids[idx];
            let Some(cursor) = self.partitions.get_mut(&partition) else {
                continue;
            };

            // Skip blank lines without surfacing them
            while let Some((line, next)) = Self::read_line_at(&cursor.log, cursor.read_pos).await? {
                let offset = cursor.read_pos;
                cursor.read_pos = next;
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                self.next_partition = (idx + 1) % ids.len();
                return Ok(Some(Delivery {
                    partition,
                    offset,
                    next_offset: next,
                    payload: line,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl CandidateConsumer for FileConsumer {
    async fn next(&mut self) -> Result<Delivery, BusError> {
        if self.partitions.is_empty() {
            return Err(BusError::Closed);
        }
        loop {
            if let Some(delivery) = self.poll_once().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let cursor = self
            .partitions
            .get_mut(&delivery.partition)
            .ok_or(BusError::UnknownPartition(delivery.partition))?;
        if delivery.next_offset <= cursor.committed {
            return Ok(());
        }
        write_offset(&cursor.offset_file, delivery.next_offset).await?;
        cursor.committed = delivery.next_offset;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> Result<(), BusError> {
        let cursor = self
            .partitions
            .get_mut(&delivery.partition)
            .ok_or(BusError::UnknownPartition(delivery.partition))?;
        cursor.read_pos = cursor.read_pos.min(delivery.offset);
        Ok(())
    }
}

fn log_path(config: &FileBusConfig, partition: u32) -> PathBuf {
    config.dir.join(format!("{}-{}.log", config.topic, partition))
}

fn offset_path(config: &FileBusConfig, partition: u32, group: &str) -> PathBuf {
    config
        .dir
        .join(format!("{}-{}.{}.offset", config.topic, partition, group))
}

async fn read_offset(path: &Path) -> Result<Option<u64>, BusError> {
    match fs::read(path).await {
        Ok(bytes) => {
            let record: OffsetRecord = serde_json::from_slice(&bytes)
                .map_err(|e| BusError::Offset(format!("{}: {}", path.display(), e)))?;
            Ok(Some(record.offset))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_offset(path: &Path, offset: u64) -> Result<(), BusError> {
    let bytes = serde_json::to_vec(&OffsetRecord { offset })
        .map_err(|e| BusError::Offset(e.to_string()))?;
    let tmp = path.with_extension("offset.tmp");

    let mut file = File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_bus_dir(test_name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        path.push(format!("liquidator_bus_{}_{}_{}", test_name, std::process::id(), nanos));
        path
    }

    fn fact(byte: u8) -> CandidateFact {
        CandidateFact::new(
            Address::repeat_byte(byte),
            Address::repeat_byte(0xEE),
            Address::repeat_byte(0x0A),
        )
    }

    fn options() -> ConsumerOptions {
        ConsumerOptions {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    async fn drain(consumer: &mut FileConsumer) -> Vec<Delivery> {
        let mut out = Vec::new();
        while let Ok(Ok(delivery)) =
            tokio::time::timeout(Duration::from_millis(50), consumer.next()).await
        {
            out.push(delivery);
        }
        out
    }

    #[test]
    fn test_partition_is_stable_and_in_range() {
        let account = Address::repeat_byte(0x42);
        let first = partition_for(&account, 8);
        assert_eq!(first, partition_for(&account, 8));
        assert!(first < 8);
        assert_eq!(partition_for(&account, 1), 0);
        assert_eq!(partition_for(&account, 0), 0);
    }

    #[tokio::test]
    async fn test_publish_then_consume() {
        let dir = temp_bus_dir("publish_consume");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(2)).await.unwrap();
        bus.publish_batch(&[fact(1), fact(2), fact(3)]).await.unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        let mut got: Vec<CandidateFact> = drain(&mut consumer)
            .await
            .iter()
            .map(|d| CandidateFact::decode(&d.payload).unwrap())
            .collect();
        got.sort_by_key(|f| f.account);
        assert_eq!(got, vec![fact(1), fact(2), fact(3)]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_committed_offsets_survive_restart() {
        let dir = temp_bus_dir("restart");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(1)).await.unwrap();
        bus.publish_batch(&[fact(1), fact(2)]).await.unwrap();

        {
            let mut consumer = bus.subscribe(options()).await.unwrap();
            let first = consumer.next().await.unwrap();
            consumer.ack(&first).await.unwrap();
            // second delivered but never acked
            let _second = consumer.next().await.unwrap();
        }

        let mut restarted = bus.subscribe(options()).await.unwrap();
        let delivered = drain(&mut restarted).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(CandidateFact::decode(&delivered[0].payload).unwrap(), fact(2));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_nack_rewinds() {
        let dir = temp_bus_dir("nack");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(1)).await.unwrap();
        bus.publish(&fact(7)).await.unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        let delivery = consumer.next().await.unwrap();
        consumer.nack(&delivery).await.unwrap();

        let again = consumer.next().await.unwrap();
        assert_eq!(again, delivery);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_replay_ignores_commits() {
        let dir = temp_bus_dir("replay");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(1)).await.unwrap();
        bus.publish_batch(&[fact(1), fact(2)]).await.unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        for delivery in drain(&mut consumer).await {
            consumer.ack(&delivery).await.unwrap();
        }

        let mut replaying = bus
            .subscribe(ConsumerOptions { replay: true, ..options() })
            .await
            .unwrap();
        assert_eq!(drain(&mut replaying).await.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_new_group_without_from_beginning_starts_at_end() {
        let dir = temp_bus_dir("latest");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(1)).await.unwrap();
        bus.publish(&fact(1)).await.unwrap();

        let mut consumer = bus
            .subscribe(ConsumerOptions {
                group: "late".to_string(),
                from_beginning: false,
                ..options()
            })
            .await
            .unwrap();
        bus.publish(&fact(2)).await.unwrap();

        let delivered = drain(&mut consumer).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(CandidateFact::decode(&delivered[0].payload).unwrap(), fact(2));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_partial_line_not_delivered() {
        let dir = temp_bus_dir("partial");
        let config = FileBusConfig::new(&dir).with_partitions(1);
        let bus = FileBus::open(config.clone()).await.unwrap();
        std::fs::write(log_path(&config, 0), b"{\"version\":1").unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        assert!(drain(&mut consumer).await.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_garbage_line_delivered_raw() {
        let dir = temp_bus_dir("garbage");
        let config = FileBusConfig::new(&dir).with_partitions(1);
        let bus = FileBus::open(config.clone()).await.unwrap();
        std::fs::write(log_path(&config, 0), b"not json\n\n").unwrap();
        bus.publish(&fact(1)).await.unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        let delivered = drain(&mut consumer).await;
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].payload, b"not json".to_vec());
        assert!(CandidateFact::decode(&delivered[0].payload).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_failed_batch_is_safe_to_retry() {
        let dir = temp_bus_dir("failed_batch");
        let config = FileBusConfig::new(&dir).with_partitions(2);
        let bus = FileBus::open(config.clone()).await.unwrap();

        let first = fact(1);
        let first_partition = partition_for(&first.account, 2);
        let other = (2..=u8::MAX)
            .map(fact)
            .find(|f| partition_for(&f.account, 2) != first_partition)
            .unwrap();

        // A directory where the log should be makes that partition unwritable
        let blocked = log_path(&config, partition_for(&other.account, 2));
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();
        assert!(matches!(
            bus.publish_batch(&[first, other]).await,
            Err(BusError::Io(_))
        ));

        std::fs::remove_dir(&blocked).unwrap();
        bus.publish_batch(&[first, other]).await.unwrap();

        let mut consumer = bus.subscribe(options()).await.unwrap();
        let delivered: Vec<Address> = drain(&mut consumer)
            .await
            .iter()
            .map(|d| CandidateFact::decode(&d.payload).unwrap().account)
            .collect();
        assert!(delivered.contains(&first.account));
        assert!(delivered.contains(&other.account));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_unknown_partition_rejected() {
        let dir = temp_bus_dir("unknown_partition");
        let bus = FileBus::open(FileBusConfig::new(&dir).with_partitions(2)).await.unwrap();

        let result = bus
            .subscribe(ConsumerOptions { partitions: Some(vec![5]), ..options() })
            .await;
        assert!(matches!(result, Err(BusError::UnknownPartition(5))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
