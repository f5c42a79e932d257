use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::interceptor::{EventedCall, TerminalListener};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct CallState {
    target: Option<(String, String)>,
    headers: HeaderMap,
    status: u16,
    status_text: String,
    response_headers: HeaderMap,
    response_text: Option<String>,
    aborted: bool,
    done: bool,
}

struct Shared {
    state: Mutex<CallState>,
    listeners: Mutex<Vec<TerminalListener<EventedRequest>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    finished: watch::Sender<bool>,
}

enum Outcome {
    Response {
        status: u16,
        status_text: String,
        headers: HeaderMap,
        text: Option<String>,
    },
    Failed(String),
    Aborted,
}

/// 事件式的 HTTP 调用
///
/// `open` 设定方法和 URL，`send` 在后台任务中发出请求；结束时（收到响应、
/// 传输失败或 `abort`）按注册顺序调用终止监听器，每个只调用一次。
/// 句柄可以 clone，所有 clone 指向同一次调用。
#[derive(Clone)]
pub struct EventedRequest {
    client: reqwest::Client,
    shared: Arc<Shared>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl EventedRequest {
    pub fn new(client: reqwest::Client) -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            client,
            shared: Arc::new(Shared {
                state: Mutex::new(CallState::default()),
                listeners: Mutex::new(Vec::new()),
                task: Mutex::new(None),
                finished,
            }),
        }
    }

    /// 在 `send` 之前设置请求头，非法的名称或值会被忽略
    pub fn set_header(&self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            lock(&self.shared.state).headers.append(name, value);
        }
    }

    /// 取消进行中的调用。已经结束的调用不受影响。
    pub fn abort(&self) {
        if let Some(task) = lock(&self.shared.task).take() {
            task.abort();
        }
        self.finish(Outcome::Aborted);
    }

    pub fn is_done(&self) -> bool {
        lock(&self.shared.state).done
    }

    /// 等待调用结束
    pub async fn wait(&self) {
        let mut finished = self.shared.finished.subscribe();
        // Sender 由 self 持有，不会提前关闭
        let _ = finished.wait_for(|done| *done).await;
    }

    fn finish(&self, outcome: Outcome) {
        {
            let mut state = lock(&self.shared.state);
            if state.done {
                return;
            }
            state.done = true;
            match outcome {
                Outcome::Response {
                    status,
                    status_text,
                    headers,
                    text,
                } => {
                    state.status = status;
                    state.status_text = status_text;
                    state.response_headers = headers;
                    state.response_text = text;
                }
                Outcome::Failed(reason) => {
                    debug!("evented request failed: {}", reason);
                }
                Outcome::Aborted => state.aborted = true,
            }
        }

        let listeners = mem::take(&mut *lock(&self.shared.listeners));
        for listener in listeners {
            listener(self);
        }
        self.shared.finished.send_replace(true);
    }

    async fn run(client: reqwest::Client, request: reqwest::Request) -> Outcome {
        match client.execute(request).await {
            Ok(response) => {
                let status = response.status();
                let headers = response.headers().clone();
                let text = response.text().await.ok();
                Outcome::Response {
                    status: status.as_u16(),
                    status_text: status.canonical_reason().unwrap_or_default().to_string(),
                    headers,
                    text,
                }
            }
            Err(error) => Outcome::Failed(error.to_string()),
        }
    }
}

impl EventedCall for EventedRequest {
    fn open(&mut self, method: &str, url: &str) {
        lock(&self.shared.state).target = Some((method.to_string(), url.to_string()));
    }

    fn send(&mut self, body: Option<String>) {
        let (target, headers) = {
            let mut state = lock(&self.shared.state);
            (state.target.take(), mem::take(&mut state.headers))
        };
        let Some((method, url)) = target else {
            self.finish(Outcome::Failed("send called before open".to_string()));
            return;
        };

        let method = match reqwest::Method::from_bytes(method.as_bytes()) {
            Ok(method) => method,
            Err(e) => return self.finish(Outcome::Failed(e.to_string())),
        };
        let mut builder = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let request = match builder.build() {
            Ok(request) => request,
            Err(e) => return self.finish(Outcome::Failed(e.to_string())),
        };

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => return self.finish(Outcome::Failed(e.to_string())),
        };
        let handle = self.clone();
        let client = self.client.clone();
        let task = runtime.spawn(async move {
            let outcome = Self::run(client, request).await;
            handle.finish(outcome);
        });
        *lock(&self.shared.task) = Some(task);
    }

    /// 调用已经结束时立即执行
    fn on_terminal(&mut self, listener: TerminalListener<Self>) {
        if self.is_done() {
            listener(&*self);
            return;
        }
        lock(&self.shared.listeners).push(listener);
    }

    fn status_code(&self) -> u16 {
        lock(&self.shared.state).status
    }

    fn status_text(&self) -> String {
        lock(&self.shared.state).status_text.clone()
    }

    fn response_text(&self) -> Option<String> {
        lock(&self.shared.state).response_text.clone()
    }

    fn response_headers(&self) -> HeaderMap {
        lock(&self.shared.state).response_headers.clone()
    }

    fn was_aborted(&self) -> bool {
        lock(&self.shared.state).aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::history::{BodySnapshot, ErrorKind, LifecycleState};
    use crate::monitor::NetworkMonitor;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor() -> NetworkMonitor {
        NetworkMonitor::new(MonitorConfig::default().enabled(true))
    }

    #[tokio::test]
    async fn test_evented_request_is_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/appointments/3"))
            .and(header("x-client", "agenda"))
            .respond_with(ResponseTemplate::new(200).set_body_string("saved"))
            .mount(&mock_server)
            .await;

        let monitor = monitor();
        let mut call = monitor.evented_request(reqwest::Client::new());
        call.open("PUT", &format!("{}/v1/appointments/3", mock_server.uri()));
        call.inner().set_header("x-client", "agenda");
        call.send(Some("10:00".to_string()));
        call.inner().wait().await;

        assert_eq!(call.inner().status_code(), 200);
        assert_eq!(call.inner().response_text().as_deref(), Some("saved"));

        let record = monitor.get_request(call.record_id().unwrap()).unwrap();
        assert_eq!(record.state, LifecycleState::Completed);
        assert_eq!(record.request_body.as_deref(), Some("10:00"));
        assert_eq!(record.response_body, Some(BodySnapshot::Text("saved".into())));
        assert!(record.success);
    }

    #[tokio::test]
    async fn test_abort_is_recorded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let monitor = monitor();
        let mut call = monitor.evented_request(reqwest::Client::new());
        call.open("GET", &mock_server.uri());
        call.send(None);
        call.inner().abort();
        call.inner().wait().await;

        let record = &monitor.snapshot()[0];
        assert_eq!(record.state, LifecycleState::Errored);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn test_transport_failure_has_no_status() {
        let monitor = monitor();
        let mut call = monitor.evented_request(reqwest::Client::new());
        call.open("GET", "http://127.0.0.1:9/");
        call.send(None);
        call.inner().wait().await;

        let record = &monitor.snapshot()[0];
        assert_eq!(record.state, LifecycleState::Errored);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn test_send_outside_runtime_fails_fast() {
        let monitor = monitor();
        let mut call = monitor.evented_request(reqwest::Client::new());
        call.open("GET", "http://localhost/");
        call.send(None);

        assert!(call.inner().is_done());
        assert_eq!(monitor.snapshot()[0].state, LifecycleState::Errored);
    }
}
