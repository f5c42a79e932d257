use crate::history::model::{LifecycleState, RequestRecord, StatusClass};
use serde::{Deserialize, Serialize};

/// 请求过滤条件，所有条件取交集
///
/// method / url 比较不区分大小写，url 为子串匹配。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestFilter {
    pub method: Option<String>,
    pub state: Option<LifecycleState>,
    pub status_class: Option<StatusClass>,
    pub url: Option<String>,
    pub error_only: bool,
    pub success_only: bool,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn status_class(mut self, class: StatusClass) -> Self {
        self.status_class = Some(class);
        self
    }

    pub fn url(mut self, needle: impl Into<String>) -> Self {
        self.url = Some(needle.into());
        self
    }

    /// 只保留 `success == false` 的记录，包括 pending
    pub fn error_only(mut self) -> Self {
        self.error_only = true;
        self
    }

    pub fn success_only(mut self) -> Self {
        self.success_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &RequestRecord) -> bool {
        if let Some(method) = &self.method
            && !record.method.eq_ignore_ascii_case(method)
        {
            return false;
        }

        if let Some(state) = self.state
            && record.state != state
        {
            return false;
        }

        if let Some(class) = self.status_class
            && record.status_class() != Some(class)
        {
            return false;
        }

        if let Some(needle) = &self.url
            && !record.url.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }

        if self.error_only && record.success {
            return false;
        }

        if self.success_only && !record.success {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::model::{CallStyle, RecordPatch};
    use chrono::Utc;

    fn record(method: &str, url: &str, status: Option<u16>) -> RequestRecord {
        let mut record = RequestRecord::pending(
            "req_x".to_string(),
            CallStyle::Direct,
            method,
            url,
            Utc::now(),
        );
        if let Some(code) = status {
            record.apply(
                RecordPatch::completed(Utc::now())
                    .with_status(code, "")
                    .with_success((200..300).contains(&code)),
            );
        }
        record
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RequestFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&record("GET", "/a", None)));
        assert!(filter.matches(&record("POST", "/b", Some(500))));
    }

    #[test]
    fn test_method_and_url_are_case_insensitive() {
        let filter = RequestFilter::new().method("post").url("ESCROWS");
        assert!(filter.matches(&record("POST", "https://h/v1/escrows/1", Some(201))));
        assert!(!filter.matches(&record("GET", "https://h/v1/escrows/1", Some(200))));
        assert!(!filter.matches(&record("POST", "https://h/v1/leads", Some(200))));
    }

    #[test]
    fn test_error_only_includes_pending() {
        let filter = RequestFilter::new().error_only();
        assert!(filter.matches(&record("GET", "/a", Some(404))));
        assert!(!filter.matches(&record("GET", "/a", Some(200))));
        assert!(filter.matches(&record("GET", "/a", None)));
    }

    #[test]
    fn test_state_and_status_class() {
        let pending = RequestFilter::new().state(LifecycleState::Pending);
        assert!(pending.matches(&record("GET", "/a", None)));
        assert!(!pending.matches(&record("GET", "/a", Some(200))));

        let server_errors = RequestFilter::new().status_class(StatusClass::ServerError);
        assert!(server_errors.matches(&record("GET", "/a", Some(503))));
        assert!(!server_errors.matches(&record("GET", "/a", Some(404))));
    }
}
