use super::response_patch;
use crate::history::model::{
    BodySnapshot, CallStyle, ErrorKind, RecordError, RecordPatch, RequestRecord, new_record_id,
};
use crate::history::RecordId;
use crate::monitor::NetworkMonitor;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::warn;

pub type TerminalListener<C> = Box<dyn FnOnce(&C) + Send>;

/// 事件式调用的能力接口
///
/// 实现方负责在调用结束（完成、失败或中止）时按注册顺序调用所有终止监听器，
/// 每个监听器只调用一次。
pub trait EventedCall: Sized {
    fn open(&mut self, method: &str, url: &str);
    fn send(&mut self, body: Option<String>);
    fn on_terminal(&mut self, listener: TerminalListener<Self>);

    /// 0 表示没有收到任何响应
    fn status_code(&self) -> u16;
    fn status_text(&self) -> String;
    fn response_text(&self) -> Option<String>;

    fn response_headers(&self) -> HeaderMap {
        HeaderMap::new()
    }

    fn was_aborted(&self) -> bool {
        false
    }
}

struct Stash {
    id: RecordId,
    method: String,
    url: String,
    issued_at: DateTime<Utc>,
}

/// 事件式调用的装饰器
///
/// `open` 记下方法、URL、发起时间和 id；`send` 插入 pending 记录并挂上终止监听器。
/// 调用方自己的监听器原样转发给内部对象。
pub struct InstrumentedCall<C> {
    inner: C,
    monitor: NetworkMonitor,
    stash: Option<Stash>,
    record_id: Option<RecordId>,
}

impl<C: EventedCall + 'static> InstrumentedCall<C> {
    pub fn new(inner: C, monitor: NetworkMonitor) -> Self {
        Self {
            inner,
            monitor,
            stash: None,
            record_id: None,
        }
    }

    pub fn open(&mut self, method: &str, url: &str) {
        self.stash = self.monitor.is_enabled().then(|| Stash {
            id: new_record_id(),
            method: method.to_string(),
            url: url.to_string(),
            issued_at: self.monitor.now(),
        });
        self.inner.open(method, url);
    }

    pub fn send(&mut self, body: Option<String>) {
        if let Some(stash) = self.stash.take()
            && self.monitor.is_enabled()
        {
            let request_body = if self.monitor.config().capture_bodies {
                body.clone()
            } else {
                None
            };
            let record = RequestRecord::pending(
                stash.id.clone(),
                CallStyle::Evented,
                stash.method,
                stash.url,
                stash.issued_at,
            )
            .with_request_body(request_body);
            self.monitor.insert(record);

            let monitor = self.monitor.clone();
            let id = stash.id.clone();
            self.inner
                .on_terminal(Box::new(move |call: &C| settle(&monitor, &id, call)));
            self.record_id = Some(stash.id);
        }
        self.inner.send(body);
    }

    pub fn on_terminal(&mut self, listener: TerminalListener<C>) {
        self.inner.on_terminal(listener);
    }

    /// 最近一次 `send` 产生的记录 id
    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

/// 读取调用结果时 panic 也要让记录结束，不影响调用方的监听器
fn settle<C: EventedCall>(monitor: &NetworkMonitor, id: &str, call: &C) {
    let completed_at = monitor.now();
    let patch = catch_unwind(AssertUnwindSafe(|| {
        terminal_patch(monitor, id, completed_at, call)
    }))
    .unwrap_or_else(|_| {
        warn!(id, "inspecting the finished call panicked");
        RecordPatch::errored(
            completed_at,
            RecordError::new(
                ErrorKind::Other("instrumentation".to_string()),
                "call state not accessible",
            ),
        )
    });
    monitor.update(id, patch);
}

fn terminal_patch<C: EventedCall>(
    monitor: &NetworkMonitor,
    id: &str,
    completed_at: DateTime<Utc>,
    call: &C,
) -> RecordPatch {
    let status = call.status_code();
    if status == 0 {
        let error = if call.was_aborted() {
            RecordError::aborted()
        } else {
            RecordError::new(ErrorKind::Network, "no response received")
        };
        RecordPatch::errored(completed_at, error)
    } else {
        response_patch(
            monitor,
            completed_at,
            status,
            call.status_text(),
            call.response_headers(),
        )
        .with_body(capture_body(monitor, id, call))
    }
}

fn capture_body<C: EventedCall>(monitor: &NetworkMonitor, id: &str, call: &C) -> Option<BodySnapshot> {
    if !monitor.config().capture_bodies {
        return None;
    }
    let limit = monitor.config().max_body_bytes;
    match catch_unwind(AssertUnwindSafe(|| call.response_text())) {
        Ok(text) => text.and_then(|t| BodySnapshot::from_text(&t, limit)),
        Err(_) => {
            warn!(id, "reading response text panicked");
            Some(BodySnapshot::unreadable("response text not accessible"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::MonitorConfig;
    use crate::history::model::LifecycleState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeCall {
        opened: Option<(String, String)>,
        sent: bool,
        listeners: Vec<TerminalListener<FakeCall>>,
        status: u16,
        status_text: String,
        text: Option<String>,
        aborted: bool,
        broken_headers: bool,
    }

    impl FakeCall {
        fn finish(&mut self, status: u16, status_text: &str, text: Option<&str>) {
            self.status = status;
            self.status_text = status_text.to_string();
            self.text = text.map(str::to_string);
            self.fire();
        }

        fn abort(&mut self) {
            self.aborted = true;
            self.fire();
        }

        fn fire(&mut self) {
            for listener in std::mem::take(&mut self.listeners) {
                listener(&*self);
            }
        }
    }

    impl EventedCall for FakeCall {
        fn open(&mut self, method: &str, url: &str) {
            self.opened = Some((method.to_string(), url.to_string()));
        }

        fn send(&mut self, _body: Option<String>) {
            self.sent = true;
        }

        fn on_terminal(&mut self, listener: TerminalListener<Self>) {
            self.listeners.push(listener);
        }

        fn status_code(&self) -> u16 {
            self.status
        }

        fn status_text(&self) -> String {
            self.status_text.clone()
        }

        fn response_text(&self) -> Option<String> {
            self.text.clone()
        }

        fn response_headers(&self) -> HeaderMap {
            if self.broken_headers {
                panic!("headers unavailable");
            }
            HeaderMap::new()
        }

        fn was_aborted(&self) -> bool {
            self.aborted
        }
    }

    fn monitor() -> (NetworkMonitor, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let monitor =
            NetworkMonitor::with_clock(MonitorConfig::default().enabled(true), clock.clone());
        (monitor, clock)
    }

    #[test]
    fn test_completed_call() {
        let (monitor, clock) = monitor();
        let mut call = monitor.instrument_call(FakeCall::default());
        call.open("PUT", "/v1/appointments/3");
        clock.advance_ms(5);
        call.send(Some(r#"{"time":"10:00"}"#.to_string()));

        assert!(call.inner().sent);
        assert_eq!(
            call.inner().opened,
            Some(("PUT".to_string(), "/v1/appointments/3".to_string()))
        );
        let id = call.record_id().unwrap().to_string();
        assert!(monitor.get_request(&id).unwrap().is_pending());

        clock.advance_ms(70);
        call.inner_mut().finish(200, "OK", Some(r#"{"ok":true}"#));

        let record = monitor.get_request(&id).unwrap();
        assert_eq!(record.call_style, CallStyle::Evented);
        assert_eq!(record.state, LifecycleState::Completed);
        // issued_at 取自 open
        assert_eq!(record.duration_ms, Some(75));
        assert!(record.success);
        assert_eq!(record.request_body.as_deref(), Some(r#"{"time":"10:00"}"#));
        assert_eq!(
            record.response_body,
            Some(BodySnapshot::Json(serde_json::json!({ "ok": true })))
        );
    }

    #[test]
    fn test_server_error_is_completed_not_errored() {
        let (monitor, _clock) = monitor();
        let mut call = monitor.instrument_call(FakeCall::default());
        call.open("GET", "/v1/escrows");
        call.send(None);
        call.inner_mut().finish(503, "Service Unavailable", None);

        let record = &monitor.snapshot()[0];
        assert_eq!(record.state, LifecycleState::Completed);
        assert!(!record.success);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Http);
        assert!(record.response_body.is_none());
    }

    #[test]
    fn test_no_status_is_errored() {
        let (monitor, _clock) = monitor();
        let mut call = monitor.instrument_call(FakeCall::default());
        call.open("GET", "/offline");
        call.send(None);
        call.inner_mut().finish(0, "", None);
        let record = &monitor.snapshot()[0];
        assert_eq!(record.state, LifecycleState::Errored);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Network);

        let mut call = monitor.instrument_call(FakeCall::default());
        call.open("GET", "/cancelled");
        call.send(None);
        call.inner_mut().abort();
        let record = &monitor.snapshot()[0];
        assert_eq!(record.url, "/cancelled");
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Aborted);
    }

    #[test]
    fn test_panicking_adapter_still_ends_record() {
        let (monitor, _clock) = monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut call = monitor.instrument_call(FakeCall {
            broken_headers: true,
            ..FakeCall::default()
        });
        call.open("GET", "/v1/leads");
        call.send(None);
        let counter = Arc::clone(&fired);
        call.on_terminal(Box::new(move |_: &FakeCall| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        call.inner_mut().finish(200, "OK", Some("ok"));

        let record = &monitor.snapshot()[0];
        assert_eq!(record.state, LifecycleState::Errored);
        assert_eq!(
            record.error.as_ref().unwrap().kind,
            ErrorKind::Other("instrumentation".to_string())
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_caller_listeners_still_fire() {
        let (monitor, _clock) = monitor();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut call = monitor.instrument_call(FakeCall::default());

        let counter = Arc::clone(&fired);
        call.on_terminal(Box::new(move |c: &FakeCall| {
            assert_eq!(c.status_code(), 201);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        call.open("POST", "/v1/leads");
        call.send(None);
        call.inner_mut().finish(201, "Created", None);

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(monitor.snapshot()[0].success);
    }

    #[test]
    fn test_disabled_and_unopened_calls_are_not_recorded() {
        let (monitor, _clock) = monitor();

        // send 之前没有 open
        let mut call = monitor.instrument_call(FakeCall::default());
        call.send(None);
        assert!(call.inner().sent);
        assert!(call.record_id().is_none());

        monitor.disable();
        let mut call = monitor.instrument_call(FakeCall::default());
        call.open("GET", "/a");
        call.send(None);
        call.inner_mut().finish(200, "OK", None);
        assert!(call.inner().listeners.is_empty());
        assert!(monitor.snapshot().is_empty());
    }
}
