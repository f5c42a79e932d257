//! Synchronous change notifications for history observers.

use crate::history::Snapshot;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

type Callback = dyn Fn(&Snapshot) + Send + Sync;

struct Subscriber {
    id: u64,
    callback: Arc<Callback>,
}

/// 待投递的快照，按入队顺序投递
#[derive(Default)]
struct Outbox {
    pending: VecDeque<Snapshot>,
    draining: bool,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber>>,
    outbox: Mutex<Outbox>,
}

impl BusInner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }
}

/// 订阅总线
///
/// 按注册顺序同步通知。回调在锁外执行，所以回调里可以查询监控器或取消订阅；
/// 回调 panic 会被捕获并记录，不影响其他订阅者。
///
/// `enqueue` + `flush` 保证快照按入队顺序投递：同一时刻只有一个线程在投递，
/// 其他线程入队后直接返回，由正在投递的线程依次送出。
#[derive(Clone, Default)]
pub struct SubscriptionBus {
    inner: Arc<BusInner>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.inner.outbox.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 排入一个快照。需要在产生快照的同一把锁内调用，入队顺序即变更顺序。
    pub fn enqueue(&self, snapshot: Snapshot) {
        self.outbox().pending.push_back(snapshot);
    }

    /// 投递所有排队的快照，返回正常完成的回调数。
    /// 已有线程在投递时立即返回 0（包括在回调里再次触发的情况）。
    pub fn flush(&self) -> usize {
        {
            let mut outbox = self.outbox();
            if outbox.draining {
                return 0;
            }
            outbox.draining = true;
        }

        let mut delivered = 0;
        loop {
            let next = {
                let mut outbox = self.outbox();
                match outbox.pending.pop_front() {
                    Some(snapshot) => snapshot,
                    None => {
                        outbox.draining = false;
                        break;
                    }
                }
            };
            delivered += self.publish(&next);
        }
        delivered
    }

    /// 通知所有当前订阅者，返回正常完成的回调数
    pub fn publish(&self, snapshot: &Snapshot) -> usize {
        let callbacks: Vec<(u64, Arc<Callback>)> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| (s.id, Arc::clone(&s.callback)))
            .collect();

        let mut delivered = 0;
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    warn!(subscriber = id, "subscriber panicked: {}", reason);
                }
            }
        }
        delivered
    }
}

/// `subscribe` 返回的句柄。丢弃句柄不会取消订阅。
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 取消订阅，返回订阅是否仍然存在
    pub fn unsubscribe(self) -> bool {
        self.bus
            .upgrade()
            .map(|bus| bus.remove(self.id))
            .unwrap_or(false)
    }
}
