use crate::interceptor::DescribeRequest;
use crate::Result;
use reqwest::header::HeaderMap;

/// 默认 host，当 URL 中未指定 host 时使用
const DEFAULT_HOST: &str = "localhost";
/// 默认 scheme，当 URL 中未指定 scheme 时使用
const DEFAULT_SCHEME: &str = "http";

/// 解析命令行里输入的 URL，支持简写
///
/// - `:3000` -> `http://localhost:3000/`
/// - `localhost:3000/api` -> `http://localhost:3000/api`
/// - `https://:8443` -> `https://localhost:8443/`
pub fn normalize_url(input: &str) -> Result<reqwest::Url> {
    let input = input.trim();

    let normalized = if input.starts_with(':') {
        format!("{}://{}{}", DEFAULT_SCHEME, DEFAULT_HOST, input)
    } else if let Some(pos) = input.find("://") {
        let after_scheme = &input[pos + 3..];
        if after_scheme.starts_with(':') {
            format!("{}://{}{}", &input[..pos], DEFAULT_HOST, after_scheme)
        } else {
            input.to_string()
        }
    } else {
        format!("{}://{}", DEFAULT_SCHEME, input)
    };

    Ok(reqwest::Url::parse(&normalized)?)
}

impl DescribeRequest for reqwest::Request {
    fn method(&self) -> String {
        reqwest::Request::method(self).as_str().to_string()
    }

    fn url(&self) -> String {
        reqwest::Request::url(self).to_string()
    }

    fn headers(&self) -> HeaderMap {
        reqwest::Request::headers(self).clone()
    }

    /// 只有内存中的 body 可读，流式 body 记为 None
    fn body_text(&self) -> Option<String> {
        self.body()
            .and_then(|body| body.as_bytes())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }
}
