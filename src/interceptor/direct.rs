use super::{DescribeError, DescribeRequest, PendingCall, TeeResponse};
use crate::history::model::CallStyle;
use crate::monitor::NetworkMonitor;
use std::future::Future;

/// 观察一次返回 Future 的调用
///
/// 顺序：插入 pending 记录 -> 调用原函数 -> 成功时立即返回响应，响应体在调用方读取时
/// 被复制，读完后完成记录；失败时记录错误并原样返回。返回给调用方的值与原函数完全相同。
pub async fn observe<Req, Resp, E, Fut, I>(
    monitor: &NetworkMonitor,
    request: Req,
    issue: I,
) -> Result<Resp, E>
where
    Req: DescribeRequest,
    Resp: TeeResponse,
    E: DescribeError,
    I: FnOnce(Req) -> Fut,
    Fut: Future<Output = Result<Resp, E>>,
{
    let Some(pending) = PendingCall::begin(monitor, CallStyle::Direct, &request) else {
        return issue(request).await;
    };

    match issue(request).await {
        Ok(response) => Ok(pending.complete(response)),
        Err(error) => {
            pending.fail(&error);
            Err(error)
        }
    }
}

/// 包装后的发起函数
///
/// `call` 的参数和返回类型与原函数一致；`into_inner` 取回未包装的原函数。
#[derive(Clone)]
pub struct Instrumented<F> {
    inner: F,
    monitor: NetworkMonitor,
}

impl<F> Instrumented<F> {
    pub fn new(inner: F, monitor: NetworkMonitor) -> Self {
        Self { inner, monitor }
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }

    pub async fn call<Req, Resp, E, Fut>(&self, request: Req) -> Result<Resp, E>
    where
        F: Fn(Req) -> Fut,
        Req: DescribeRequest,
        Resp: TeeResponse,
        E: DescribeError,
        Fut: Future<Output = Result<Resp, E>>,
    {
        observe(&self.monitor, request, &self.inner).await
    }
}
