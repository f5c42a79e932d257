use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::history::serialization;

/// 记录 ID，调用发起时分配，在存储生命周期内唯一
pub type RecordId = String;

pub fn new_record_id() -> RecordId {
    format!("req_{}", Uuid::new_v4().simple())
}

/// 记录生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Pending,
    Completed,
    Errored,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LifecycleState::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Pending => "pending",
            LifecycleState::Completed => "completed",
            LifecycleState::Errored => "errored",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调用的发起方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStyle {
    /// 返回 Future 的调用
    Direct,
    /// open / send / 终止事件 形式的调用
    Evented,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 收到了失败状态码 (4xx/5xx)
    Http,
    Timeout,
    Connect,
    Aborted,
    Network,
    Decode,
    Body,
    Other(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Http => f.write_str("http"),
            ErrorKind::Timeout => f.write_str("timeout"),
            ErrorKind::Connect => f.write_str("connect"),
            ErrorKind::Aborted => f.write_str("aborted"),
            ErrorKind::Network => f.write_str("network"),
            ErrorKind::Decode => f.write_str("decode"),
            ErrorKind::Body => f.write_str("body"),
            ErrorKind::Other(name) => f.write_str(name),
        }
    }
}

/// 结构化错误 `{ kind, message }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl RecordError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// 协议层失败：`HTTP 404: Not Found`
    pub fn http(status: u16, status_text: &str) -> Self {
        Self {
            kind: ErrorKind::Http,
            message: format!("HTTP {}: {}", status, status_text),
            status_code: Some(status),
        }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "request was aborted before completion")
    }
}

/// 响应体快照（仅用于展示和导出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BodySnapshot {
    Json(serde_json::Value),
    Text(String),
    Truncated { prefix: String, total_bytes: usize },
    Unreadable(String),
}

impl BodySnapshot {
    pub const UNREADABLE: &'static str = "Unable to read response body";

    /// JSON 优先，其次原始文本；超出上限时只保留前缀
    pub fn from_bytes(bytes: &[u8], limit: Option<usize>) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        if let Some(limit) = limit
            && bytes.len() > limit
        {
            return Some(BodySnapshot::Truncated {
                prefix: String::from_utf8_lossy(&bytes[..limit]).into_owned(),
                total_bytes: bytes.len(),
            });
        }
        let snapshot = match serde_json::from_slice::<serde_json::Value>(bytes) {
            Ok(value) => BodySnapshot::Json(value),
            Err(_) => BodySnapshot::Text(String::from_utf8_lossy(bytes).into_owned()),
        };
        Some(snapshot)
    }

    pub fn from_text(text: &str, limit: Option<usize>) -> Option<Self> {
        Self::from_bytes(text.as_bytes(), limit)
    }

    pub fn unreadable(reason: impl fmt::Display) -> Self {
        BodySnapshot::Unreadable(format!("{}: {}", Self::UNREADABLE, reason))
    }
}

/// 状态码分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    #[serde(rename = "1xx")]
    Informational,
    #[serde(rename = "2xx")]
    Success,
    #[serde(rename = "3xx")]
    Redirection,
    #[serde(rename = "4xx")]
    ClientError,
    #[serde(rename = "5xx")]
    ServerError,
}

impl StatusClass {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(StatusClass::Informational),
            200..=299 => Some(StatusClass::Success),
            300..=399 => Some(StatusClass::Redirection),
            400..=499 => Some(StatusClass::ClientError),
            500..=599 => Some(StatusClass::ServerError),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::Informational => "1xx",
            StatusClass::Success => "2xx",
            StatusClass::Redirection => "3xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }
}

impl FromStr for StatusClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1xx" => Ok(StatusClass::Informational),
            "2xx" => Ok(StatusClass::Success),
            "3xx" => Ok(StatusClass::Redirection),
            "4xx" => Ok(StatusClass::ClientError),
            "5xx" => Ok(StatusClass::ServerError),
            other => Err(format!("Invalid status class: {}", other)),
        }
    }
}

impl fmt::Display for StatusClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次被观察到的网络调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: RecordId,
    pub call_style: CallStyle,
    pub method: String,
    pub url: String,

    #[serde(with = "serialization::header_map", default)]
    pub request_headers: HeaderMap,

    pub request_body: Option<String>,

    pub issued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// completed_at - issued_at，终止前为 None
    pub duration_ms: Option<u64>,

    pub state: LifecycleState,
    pub status_code: Option<u16>,
    pub status_text: Option<String>,

    #[serde(with = "serialization::header_map", default)]
    pub response_headers: HeaderMap,

    pub response_body: Option<BodySnapshot>,

    /// 仅当 completed 且状态码在成功区间内时为 true
    pub success: bool,

    pub error: Option<RecordError>,
}

impl RequestRecord {
    /// 新建 pending 记录
    pub fn pending(
        id: RecordId,
        call_style: CallStyle,
        method: impl Into<String>,
        url: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            call_style,
            method: method.into(),
            url: url.into(),
            request_headers: HeaderMap::new(),
            request_body: None,
            issued_at,
            completed_at: None,
            duration_ms: None,
            state: LifecycleState::Pending,
            status_code: None,
            status_text: None,
            response_headers: HeaderMap::new(),
            response_body: None,
            success: false,
            error: None,
        }
    }

    pub fn with_request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = headers;
        self
    }

    pub fn with_request_body(mut self, body: Option<String>) -> Self {
        self.request_body = body;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_pending(&self) -> bool {
        self.state == LifecycleState::Pending
    }

    /// 已终止且不成功（pending 既不算成功也不算失败）
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.success
    }

    pub fn status_class(&self) -> Option<StatusClass> {
        self.status_code.and_then(StatusClass::from_code)
    }

    /// 合并部分字段。终止状态之后的更新全部忽略，返回是否生效。
    pub fn apply(&mut self, patch: RecordPatch) -> bool {
        if self.is_terminal() {
            return false;
        }

        if let Some(code) = patch.status_code {
            self.status_code = Some(code);
        }
        if let Some(text) = patch.status_text {
            self.status_text = Some(text);
        }
        if let Some(headers) = patch.response_headers {
            self.response_headers = headers;
        }
        if let Some(body) = patch.response_body {
            self.response_body = Some(body);
        }
        if let Some(error) = patch.error {
            self.error = Some(error);
        }
        if let Some(success) = patch.success {
            self.success = success;
        }

        if let Some(state) = patch.state
            && state.is_terminal()
        {
            let completed_at = patch.completed_at.unwrap_or(self.issued_at);
            self.state = state;
            self.completed_at = Some(completed_at);
            self.duration_ms = Some(
                (completed_at - self.issued_at)
                    .num_milliseconds()
                    .max(0) as u64,
            );
            if state == LifecycleState::Errored {
                self.success = false;
            }
        }

        true
    }
}

/// 对记录的部分更新
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub state: Option<LifecycleState>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_code: Option<u16>,
    pub status_text: Option<String>,
    pub response_headers: Option<HeaderMap>,
    pub response_body: Option<BodySnapshot>,
    pub success: Option<bool>,
    pub error: Option<RecordError>,
}

impl RecordPatch {
    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            state: Some(LifecycleState::Completed),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    pub fn errored(at: DateTime<Utc>, error: RecordError) -> Self {
        Self {
            state: Some(LifecycleState::Errored),
            completed_at: Some(at),
            success: Some(false),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, code: u16, text: impl Into<String>) -> Self {
        self.status_code = Some(code);
        self.status_text = Some(text.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.response_headers = Some(headers);
        self
    }

    pub fn with_body(mut self, body: Option<BodySnapshot>) -> Self {
        self.response_body = body;
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn with_error(mut self, error: Option<RecordError>) -> Self {
        if error.is_some() {
            self.error = error;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_at(issued_at: DateTime<Utc>) -> RequestRecord {
        RequestRecord::pending(
            "req_1".to_string(),
            CallStyle::Direct,
            "GET",
            "https://example.com/v1/escrows",
            issued_at,
        )
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let start = Utc::now();
        let mut record = record_at(start);
        assert!(record.is_pending());

        let done = start + chrono::Duration::milliseconds(120);
        assert!(record.apply(RecordPatch::completed(done).with_status(200, "OK").with_success(true)));
        assert_eq!(record.state, LifecycleState::Completed);
        assert_eq!(record.duration_ms, Some(120));
        assert!(record.success);

        // 终止之后的更新被忽略
        let later = done + chrono::Duration::milliseconds(50);
        assert!(!record.apply(RecordPatch::errored(later, RecordError::aborted())));
        assert_eq!(record.state, LifecycleState::Completed);
        assert_eq!(record.duration_ms, Some(120));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_duration_never_negative() {
        let start = Utc::now();
        let mut record = record_at(start);
        let before = start - chrono::Duration::milliseconds(10);
        record.apply(RecordPatch::errored(before, RecordError::aborted()));
        assert_eq!(record.duration_ms, Some(0));
        assert!(!record.success);
        assert!(record.is_failure());
    }

    #[test]
    fn test_pending_patch_keeps_pending() {
        let mut record = record_at(Utc::now());
        let patch = RecordPatch {
            status_text: Some("Loading".to_string()),
            ..RecordPatch::default()
        };
        assert!(record.apply(patch));
        assert!(record.is_pending());
        assert!(record.duration_ms.is_none());
        assert!(!record.is_failure());
    }

    #[test]
    fn test_body_snapshot_prefers_json() {
        let json = BodySnapshot::from_bytes(br#"{"id":42}"#, None).unwrap();
        assert_eq!(json, BodySnapshot::Json(serde_json::json!({ "id": 42 })));

        let text = BodySnapshot::from_text("plain text", None).unwrap();
        assert_eq!(text, BodySnapshot::Text("plain text".to_string()));

        assert!(BodySnapshot::from_bytes(b"", None).is_none());

        let truncated = BodySnapshot::from_text("abcdef", Some(3)).unwrap();
        assert_eq!(
            truncated,
            BodySnapshot::Truncated {
                prefix: "abc".to_string(),
                total_bytes: 6
            }
        );
    }

    #[test]
    fn test_status_class() {
        assert_eq!(StatusClass::from_code(204), Some(StatusClass::Success));
        assert_eq!(StatusClass::from_code(404), Some(StatusClass::ClientError));
        assert_eq!(StatusClass::from_code(0), None);
        assert_eq!("5XX".parse::<StatusClass>(), Ok(StatusClass::ServerError));
        assert!("6xx".parse::<StatusClass>().is_err());
    }

    #[test]
    fn test_http_error_message() {
        let error = RecordError::http(404, "Not Found");
        assert_eq!(error.message, "HTTP 404: Not Found");
        assert_eq!(error.kind, ErrorKind::Http);
    }
}
