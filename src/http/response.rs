use std::pin::Pin;
use std::task::{Context, Poll};

use crate::history::ErrorKind;
use crate::interceptor::{BodyCapture, BodySink, DescribeError, TeeResponse};
use bytes::Bytes;
use futures_util::Stream;
use reqwest::header::HeaderMap;
use reqwest::{Body, ResponseBuilderExt, StatusCode, Url, Version};

impl TeeResponse for reqwest::Response {
    fn status_code(&self) -> u16 {
        self.status().as_u16()
    }

    fn status_text(&self) -> String {
        self.status().canonical_reason().unwrap_or_default().to_string()
    }

    fn header_map(&self) -> HeaderMap {
        self.headers().clone()
    }

    /// 用同样的状态、头、URL 和扩展重新组装响应，body 换成逐块转发的 [`TeeStream`]。
    /// 调用方拿到响应的时机和原响应相同，不等待 body。
    fn tee_body(self, capture: BodyCapture, sink: BodySink) -> Self {
        let status = self.status();
        let version = self.version();
        let url = self.url().clone();
        let headers = self.headers().clone();
        let extensions = self.extensions().clone();

        let tee = TeeStream::new(self.bytes_stream(), capture, sink);
        rebuild(
            Head {
                status,
                version,
                url,
                headers,
                extensions,
            },
            Body::wrap_stream(tee),
        )
    }
}

/// 把每个块原样转发给调用方，同时复制到 [`BodyCapture`]
struct TeeStream<S> {
    inner: Pin<Box<S>>,
    capture: BodyCapture,
    sink: Option<BodySink>,
}

impl<S> TeeStream<S> {
    fn new(inner: S, capture: BodyCapture, sink: BodySink) -> Self {
        Self {
            inner: Box::pin(inner),
            capture,
            sink: Some(sink),
        }
    }

    fn settle(&mut self, result: Result<(), String>) {
        if let Some(sink) = self.sink.take() {
            sink(result.map(|()| std::mem::take(&mut self.capture)));
        }
    }
}

impl<S> Stream for TeeStream<S>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    type Item = reqwest::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.capture.push(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.settle(Err(error.to_string()));
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.settle(Ok(()));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Head {
    status: StatusCode,
    version: Version,
    url: Url,
    headers: HeaderMap,
    extensions: http::Extensions,
}

fn rebuild(head: Head, body: Body) -> reqwest::Response {
    let builder = http::Response::builder()
        .status(head.status)
        .version(head.version)
        .url(head.url)
        .body(())
        .unwrap_or_else(|_| http::Response::new(()));
    let (mut parts, ()) = builder.into_parts();
    parts.headers = head.headers;
    // 保留连接信息（remote_addr 等），URL 以 builder 设置的为准
    let url_extension = std::mem::replace(&mut parts.extensions, head.extensions);
    parts.extensions.extend(url_extension);
    reqwest::Response::from(http::Response::from_parts(parts, body))
}

impl DescribeError for reqwest::Error {
    fn kind(&self) -> ErrorKind {
        if self.is_timeout() {
            ErrorKind::Timeout
        } else if self.is_connect() {
            ErrorKind::Connect
        } else if self.is_body() {
            ErrorKind::Body
        } else if self.is_decode() {
            ErrorKind::Decode
        } else if self.is_request() {
            ErrorKind::Network
        } else {
            ErrorKind::Other("reqwest".to_string())
        }
    }
}
