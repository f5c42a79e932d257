//! Public control and query surface.
//!
//! A [`NetworkMonitor`] owns the history store, the subscription bus and the
//! enabled flag. It is a cheap handle: clones share the same state, so the
//! wrappers it hands out keep recording into the same history.

use crate::bus::{Subscription, SubscriptionBus};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigLoader, MonitorConfig};
use crate::history::{HistoryStore, RecordPatch, RequestRecord, Snapshot, UpdateOutcome};
use crate::http::{EventedRequest, InstrumentedClient};
use crate::interceptor::{EventedCall, Instrumented, InstrumentedCall};
use crate::stats::{
    self, EndpointAggregate, Percentiles, RequestFilter, StatsSummary, normalize_endpoint,
};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tracing::{debug, info};

struct MonitorInner {
    config: MonitorConfig,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    store: Mutex<HistoryStore>,
    bus: SubscriptionBus,
}

#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (records, capacity) = {
            let store = self.store();
            (store.len(), store.capacity())
        };
        f.debug_struct("NetworkMonitor")
            .field("enabled", &self.is_enabled())
            .field("records", &records)
            .field("capacity", &capacity)
            .finish()
    }
}

impl NetworkMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: MonitorConfig, clock: Arc<dyn Clock>) -> Self {
        let store = HistoryStore::with_capacity(config.capacity);
        let enabled = config.enabled;
        Self {
            inner: Arc::new(MonitorInner {
                config,
                clock,
                enabled: AtomicBool::new(enabled),
                store: Mutex::new(store),
                bus: SubscriptionBus::new(),
            }),
        }
    }

    /// 校验配置后创建
    pub fn try_new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    fn store(&self) -> MutexGuard<'_, HistoryStore> {
        // 插桩逻辑 panic 后仍然继续工作
        self.inner.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- control -------------------------------------------------------

    /// 启用拦截。幂等，返回状态是否发生变化。
    pub fn enable(&self) -> bool {
        let changed = !self.inner.enabled.swap(true, Ordering::SeqCst);
        if changed {
            info!("Network monitor enabled");
        }
        changed
    }

    /// 停用拦截。已有历史仍可查询，进行中的调用仍会完成各自的记录。
    pub fn disable(&self) -> bool {
        let changed = self.inner.enabled.swap(false, Ordering::SeqCst);
        if changed {
            info!("Network monitor disabled");
        }
        changed
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(callback)
    }

    pub fn clear(&self) {
        {
            let mut store = self.store();
            store.clear();
            self.inner.bus.enqueue(store.snapshot());
        }
        debug!("history cleared");
        self.inner.bus.flush();
    }

    /// 调整容量，缩小时立即淘汰旧记录
    pub fn set_capacity(&self, capacity: usize) {
        {
            let mut store = self.store();
            if store.set_capacity(capacity).is_empty() {
                return;
            }
            self.inner.bus.enqueue(store.snapshot());
        }
        self.inner.bus.flush();
    }

    // ---- wrapping ------------------------------------------------------

    /// 包装任意返回 Future 的发起函数
    pub fn wrap<F>(&self, issue: F) -> Instrumented<F> {
        Instrumented::new(issue, self.clone())
    }

    pub fn instrument_client(&self, client: reqwest::Client) -> InstrumentedClient {
        InstrumentedClient::new(client, self.clone())
    }

    pub fn instrument_call<C: EventedCall + 'static>(&self, call: C) -> InstrumentedCall<C> {
        InstrumentedCall::new(call, self.clone())
    }

    /// 基于 reqwest 的事件式调用，已包装
    pub fn evented_request(&self, client: reqwest::Client) -> InstrumentedCall<EventedRequest> {
        self.instrument_call(EventedRequest::new(client))
    }

    // ---- store mutations used by the interceptors ----------------------

    pub(crate) fn insert(&self, record: RequestRecord) {
        debug!(id = %record.id, method = %record.method, url = %record.url, "request issued");
        {
            let mut store = self.store();
            store.insert(record);
            self.notify_locked(&store);
        }
        self.inner.bus.flush();
    }

    pub(crate) fn update(&self, id: &str, patch: RecordPatch) -> UpdateOutcome {
        let outcome = {
            let mut store = self.store();
            let outcome = store.update(id, patch);
            if outcome.is_applied() {
                self.notify_locked(&store);
            }
            outcome
        };
        match outcome {
            UpdateOutcome::Applied => debug!(id, "request record updated"),
            UpdateOutcome::NotFound => debug!(id, "record already evicted, update dropped"),
            UpdateOutcome::AlreadyTerminal => debug!(id, "record already terminal, update dropped"),
        }
        self.inner.bus.flush();
        outcome
    }

    /// 在 store 锁内排入快照，保证通知顺序与变更顺序一致；没有订阅者时不生成快照
    fn notify_locked(&self, store: &HistoryStore) {
        if self.inner.bus.subscriber_count() > 0 {
            self.inner.bus.enqueue(store.snapshot());
        }
    }

    // ---- queries -------------------------------------------------------

    pub fn snapshot(&self) -> Snapshot {
        self.store().snapshot()
    }

    pub fn get_request(&self, id: &str) -> Option<RequestRecord> {
        self.store().get(id).cloned()
    }

    pub fn get_requests(&self, filter: &RequestFilter) -> Vec<RequestRecord> {
        stats::filter(&self.snapshot(), |r| filter.matches(r))
    }

    /// `success == false` 的记录，包括仍在进行中的
    pub fn get_errors(&self) -> Vec<RequestRecord> {
        stats::filter(&self.snapshot(), |r| !r.success)
    }

    pub fn get_stats(&self) -> StatsSummary {
        stats::compute_stats(&self.snapshot())
    }

    pub fn get_percentiles(&self) -> Percentiles {
        stats::compute_percentiles(&self.snapshot())
    }

    pub fn get_endpoints(&self) -> BTreeMap<String, EndpointAggregate> {
        stats::group_by_endpoint(&self.snapshot(), normalize_endpoint)
    }

    pub fn export(&self) -> ExportDocument {
        ExportDocument::from_snapshot(self.snapshot(), self.now())
    }

    pub fn export_json(&self, pretty: bool) -> Result<String> {
        self.export().to_json(pretty)
    }
}

/// 进程级默认实例，配置来自 `ConfigLoader::find_and_load`
pub fn global() -> &'static NetworkMonitor {
    static MONITOR: OnceLock<NetworkMonitor> = OnceLock::new();
    MONITOR.get_or_init(|| NetworkMonitor::new(ConfigLoader::find_and_load()))
}

/// 导出文档（复制 / 下载）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub exported_at: DateTime<Utc>,
    pub records: Snapshot,
    pub stats: StatsSummary,
    pub percentiles: Percentiles,
    pub endpoints: BTreeMap<String, EndpointAggregate>,
}

impl ExportDocument {
    pub fn from_snapshot(records: Snapshot, exported_at: DateTime<Utc>) -> Self {
        Self {
            exported_at,
            stats: stats::compute_stats(&records),
            percentiles: stats::compute_percentiles(&records),
            endpoints: stats::group_by_endpoint(&records, normalize_endpoint),
            records,
        }
    }

    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json(true)?)?;
        Ok(())
    }

    pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
