use super::model::{RecordPatch, RequestRecord};
use crate::config::DEFAULT_CAPACITY;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// 存储内容的不可变副本，newest-first
///
/// 克隆只复制指针，可以安全地交给统计函数和订阅者。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot(Arc<Vec<RequestRecord>>);

impl Snapshot {
    pub fn new(records: Vec<RequestRecord>) -> Self {
        Self(Arc::new(records))
    }

    pub fn to_vec(&self) -> Vec<RequestRecord> {
        self.0.as_ref().clone()
    }
}

impl Deref for Snapshot {
    type Target = [RequestRecord];

    fn deref(&self) -> &Self::Target {
        self.0.as_slice()
    }
}

impl From<Vec<RequestRecord>> for Snapshot {
    fn from(records: Vec<RequestRecord>) -> Self {
        Self::new(records)
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a RequestRecord;
    type IntoIter = std::slice::Iter<'a, RequestRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<RequestRecord>::deserialize(deserializer).map(Snapshot::new)
    }
}

/// `update` 的结果。找不到记录不是错误（可能已被淘汰）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    NotFound,
    AlreadyTerminal,
}

impl UpdateOutcome {
    pub fn is_applied(self) -> bool {
        self == UpdateOutcome::Applied
    }
}

/// 有界历史存储
///
/// # Order
/// 按插入顺序 newest-first，与完成顺序无关。
///
/// # Eviction
/// 超出容量时淘汰最旧（尾部）的记录，即使它仍是 pending。
#[derive(Debug, Clone)]
pub struct HistoryStore {
    records: VecDeque<RequestRecord>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 容量至少为 1
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 插入到最前面，返回被淘汰的记录
    pub fn insert(&mut self, record: RequestRecord) -> Vec<RequestRecord> {
        self.records.push_front(record);
        self.evict_overflow()
    }

    /// 缩小容量时立即淘汰多出的旧记录
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<RequestRecord> {
        self.capacity = capacity.max(1);
        self.evict_overflow()
    }

    fn evict_overflow(&mut self) -> Vec<RequestRecord> {
        let mut evicted = Vec::new();
        while self.records.len() > self.capacity {
            if let Some(oldest) = self.records.pop_back() {
                debug!(id = %oldest.id, state = %oldest.state, "evicting oldest record");
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// 按 id 合并字段
    pub fn update(&mut self, id: &str, patch: RecordPatch) -> UpdateOutcome {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            return UpdateOutcome::NotFound;
        };
        if record.apply(patch) {
            UpdateOutcome::Applied
        } else {
            UpdateOutcome::AlreadyTerminal
        }
    }

    pub fn get(&self, id: &str) -> Option<&RequestRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.records.iter().cloned().collect())
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
