//! Wrappers that observe outbound calls without changing their outcome.
//!
//! Two issuance styles are supported:
//! - [`direct`]: a function returning a future of `Result<Response, Error>`
//! - [`evented`]: an object with `open` / `send` and a terminal event
//!
//! Both consult the monitor's enabled flag on every call. While disabled the
//! original is invoked directly and nothing is captured.

pub mod direct;
pub mod evented;

pub use direct::{Instrumented, observe};
pub use evented::{EventedCall, InstrumentedCall, TerminalListener};

use crate::history::model::{
    BodySnapshot, CallStyle, ErrorKind, RecordError, RecordPatch, RequestRecord, new_record_id,
};
use crate::history::RecordId;
use crate::monitor::NetworkMonitor;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use std::fmt;
use tracing::warn;

/// 从请求对象读取记录所需的信息
pub trait DescribeRequest {
    fn method(&self) -> String;
    fn url(&self) -> String;

    fn headers(&self) -> HeaderMap {
        HeaderMap::new()
    }

    fn body_text(&self) -> Option<String> {
        None
    }
}

/// 传输层错误的分类
pub trait DescribeError: fmt::Display {
    fn kind(&self) -> ErrorKind;

    fn message(&self) -> String {
        self.to_string()
    }
}

/// 响应体读完（`Ok`）或读取失败（`Err`）时调用一次
pub type BodySink = Box<dyn FnOnce(Result<BodyCapture, String>) + Send>;

/// 可以在不影响调用方的前提下复制响应体的响应
pub trait TeeResponse: Sized + Send {
    fn status_code(&self) -> u16;
    fn status_text(&self) -> String;
    fn header_map(&self) -> HeaderMap;

    /// 立即返回交给调用方的响应，调用方读取 body 时逐块复制到 `capture`。
    /// body 读到结尾或出错时调用 `sink`；响应在此之前被丢弃时 `sink` 随之丢弃，不会被调用。
    fn tee_body(self, capture: BodyCapture, sink: BodySink) -> Self;
}

/// 复制出的响应体：最多保留 `limit` 字节，同时统计总长度
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyCapture {
    limit: Option<usize>,
    kept: Vec<u8>,
    total_bytes: usize,
}

impl BodyCapture {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total_bytes += chunk.len();
        let room = match self.limit {
            Some(limit) => limit.saturating_sub(self.kept.len()).min(chunk.len()),
            None => chunk.len(),
        };
        self.kept.extend_from_slice(&chunk[..room]);
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn into_snapshot(self) -> Option<BodySnapshot> {
        if self.total_bytes > self.kept.len() {
            return Some(BodySnapshot::Truncated {
                prefix: String::from_utf8_lossy(&self.kept).into_owned(),
                total_bytes: self.total_bytes,
            });
        }
        BodySnapshot::from_bytes(&self.kept, self.limit)
    }
}

/// Plain request description for transports without their own request type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallInfo {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

impl CallInfo {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl DescribeRequest for CallInfo {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn headers(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn body_text(&self) -> Option<String> {
        self.body.clone()
    }
}

/// Fully buffered response; duplicating it is a clone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_string(),
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

impl TeeResponse for BufferedResponse {
    fn status_code(&self) -> u16 {
        self.status
    }

    fn status_text(&self) -> String {
        self.status_text.clone()
    }

    fn header_map(&self) -> HeaderMap {
        self.headers.clone()
    }

    fn tee_body(self, mut capture: BodyCapture, sink: BodySink) -> Self {
        capture.push(&self.body);
        sink(Ok(capture));
        self
    }
}

/// Transport failure carrying its own classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl CallFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CallFailure {}

impl DescribeError for CallFailure {
    fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

impl DescribeError for std::io::Error {
    fn kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;
        match std::io::Error::kind(self) {
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionRefused | Io::ConnectionReset | Io::NotConnected => ErrorKind::Connect,
            Io::Interrupted | Io::ConnectionAborted => ErrorKind::Aborted,
            Io::InvalidData => ErrorKind::Decode,
            _ => ErrorKind::Network,
        }
    }
}

/// 构造"收到响应"的终止更新
pub(crate) fn response_patch(
    monitor: &NetworkMonitor,
    completed_at: DateTime<Utc>,
    status: u16,
    status_text: String,
    headers: HeaderMap,
) -> RecordPatch {
    let success = monitor.config().is_success_status(status);
    let error = (!success).then(|| RecordError::http(status, &status_text));
    RecordPatch::completed(completed_at)
        .with_status(status, status_text)
        .with_headers(headers)
        .with_success(success)
        .with_error(error)
}

/// 一次进行中的调用
///
/// 在终止更新之前被丢弃（Future 被取消）时，记录以 `Aborted` 结束；
/// 如果响应头已经到达，则以已收到的响应结束。
pub(crate) struct PendingCall {
    monitor: NetworkMonitor,
    id: RecordId,
    fallback: Option<RecordPatch>,
    armed: bool,
}

impl PendingCall {
    /// 监控停用时返回 None
    pub(crate) fn begin<R: DescribeRequest>(
        monitor: &NetworkMonitor,
        style: CallStyle,
        request: &R,
    ) -> Option<Self> {
        if !monitor.is_enabled() {
            return None;
        }
        let id = new_record_id();
        let body = if monitor.config().capture_bodies {
            request.body_text()
        } else {
            None
        };
        let record = RequestRecord::pending(
            id.clone(),
            style,
            request.method(),
            request.url(),
            monitor.now(),
        )
        .with_request_headers(request.headers())
        .with_request_body(body);
        monitor.insert(record);

        Some(Self {
            monitor: monitor.clone(),
            id,
            fallback: None,
            armed: true,
        })
    }

    /// 响应头到达即返回；记录在调用方读完 body 时终止，响应被提前丢弃时以不含 body 的结果终止
    pub(crate) fn complete<R: TeeResponse>(mut self, response: R) -> R {
        let completed_at = self.monitor.now();
        let patch = response_patch(
            &self.monitor,
            completed_at,
            response.status_code(),
            response.status_text(),
            response.header_map(),
        );

        if !self.monitor.config().capture_bodies {
            self.settle(patch);
            return response;
        }

        self.fallback = Some(patch.clone());
        let capture = BodyCapture::new(self.monitor.config().max_body_bytes);
        response.tee_body(
            capture,
            Box::new(move |body| {
                let snapshot = match body {
                    Ok(capture) => capture.into_snapshot(),
                    Err(reason) => {
                        warn!(id = %self.id, "failed to capture response body: {}", reason);
                        Some(BodySnapshot::unreadable(reason))
                    }
                };
                self.settle(patch.with_body(snapshot));
            }),
        )
    }

    pub(crate) fn fail<E: DescribeError>(self, error: &E) {
        let patch = RecordPatch::errored(
            self.monitor.now(),
            RecordError::new(error.kind(), error.message()),
        );
        self.settle(patch);
    }

    fn settle(mut self, patch: RecordPatch) {
        self.armed = false;
        self.monitor.update(&self.id, patch);
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let patch = self.fallback.take().unwrap_or_else(|| {
            RecordPatch::errored(self.monitor.now(), RecordError::aborted())
        });
        self.monitor.update(&self.id, patch);
    }
}
