use std::time::Duration;

use crate::interceptor::observe;
use crate::monitor::NetworkMonitor;
use crate::Result;
use reqwest::{IntoUrl, Method, Request, RequestBuilder, Response};

/// reqwest 客户端的包装
///
/// `execute` / `send` 的返回值与 `reqwest::Client` 完全一致，
/// 调用过程记录到所属的监控器。
#[derive(Clone, Debug)]
pub struct InstrumentedClient {
    inner: reqwest::Client,
    monitor: NetworkMonitor,
}

impl InstrumentedClient {
    pub fn new(inner: reqwest::Client, monitor: NetworkMonitor) -> Self {
        Self { inner, monitor }
    }

    /// 创建带超时的客户端
    pub fn with_timeout(monitor: NetworkMonitor, timeout: Duration) -> Result<Self> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(inner, monitor))
    }

    pub async fn execute(&self, request: Request) -> reqwest::Result<Response> {
        observe(&self.monitor, request, |request| self.inner.execute(request)).await
    }

    /// 构建失败不算一次调用，不会产生记录
    pub async fn send(&self, builder: RequestBuilder) -> reqwest::Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.get(url)
    }

    pub fn post<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.inner.post(url)
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.inner.request(method, url)
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    pub fn into_inner(self) -> reqwest::Client {
        self.inner
    }
}
