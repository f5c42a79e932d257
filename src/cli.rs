use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use colored::*;
use futures_util::future::join_all;
use netmon::http::normalize_url;
use netmon::report::{self, RecordFormatter};
use netmon::stats;
use netmon::{
    ConfigLoader, ExportDocument, InstrumentedClient, LifecycleState, NetworkMonitor,
    RequestFilter, RequestRecord, StatusClass,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

pub type Result<T> = std::result::Result<T, anyhow::Error>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 发送请求并展示监控结果
    Probe(ProbeArgs),
    /// 查看导出的历史文件
    Inspect(InspectArgs),
}

#[derive(clap::Args, Debug)]
pub struct ProbeArgs {
    /// 目标 URL，支持 `:3000/path` 等简写
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[arg(short = 'X', long = "request", default_value = "GET")]
    pub method: String,

    /// 请求头，格式 `Key: Value`
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// 请求体
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// 每个 URL 请求的次数
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,

    /// 超时（秒）
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// 把历史导出到 JSON 文件
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// 输出每条记录的详细信息
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    pub file: PathBuf,

    #[arg(short = 'X', long)]
    pub method: Option<String>,

    /// 状态码分类，如 `4xx`
    #[arg(long)]
    pub status: Option<String>,

    /// URL 子串
    #[arg(long)]
    pub url: Option<String>,

    /// 只显示失败的请求
    #[arg(long)]
    pub errors: bool,

    #[arg(long)]
    pub pending: bool,

    #[arg(short, long)]
    pub verbose: bool,
}

/// 解析 `Key: Value` 形式的请求头
fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (key, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Invalid header (expected `Key: Value`): {}", raw))?;
    let name = HeaderName::from_bytes(key.trim().as_bytes())
        .with_context(|| format!("Invalid header name: {}", key.trim()))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value for {}", name))?;
    Ok((name, value))
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for header in raw {
        let (name, value) = parse_header(header)?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn build_filter(args: &InspectArgs) -> Result<RequestFilter> {
    let mut filter = RequestFilter::new();
    if let Some(method) = &args.method {
        filter = filter.method(method);
    }
    if let Some(status) = &args.status {
        let class: StatusClass = status.parse().map_err(|e: String| anyhow!(e))?;
        filter = filter.status_class(class);
    }
    if let Some(url) = &args.url {
        filter = filter.url(url);
    }
    if args.errors {
        filter = filter.error_only();
    }
    if args.pending {
        filter = filter.state(LifecycleState::Pending);
    }
    Ok(filter)
}

fn print_records(records: &[RequestRecord], verbose: bool) {
    println!("{}", report::history_table(records));
    if verbose {
        let formatter = RecordFormatter::new();
        for record in records {
            println!("\n{}", formatter.format(record));
        }
    }
}

pub async fn probe(args: ProbeArgs) -> Result<()> {
    let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", args.method))?;
    let headers = parse_headers(&args.headers)?;
    let urls = args
        .urls
        .iter()
        .map(|u| normalize_url(u))
        .collect::<netmon::Result<Vec<_>>>()?;

    let config = ConfigLoader::find_and_load();
    let capacity = config.capacity.max(urls.len() * args.repeat);
    let config = config.enabled(true).with_capacity(capacity);
    let monitor = NetworkMonitor::try_new(config)?;
    let client = InstrumentedClient::with_timeout(monitor.clone(), Duration::from_secs(args.timeout))?;

    let (client, method, headers, data) = (&client, &method, &headers, args.data.as_ref());
    let calls = urls.iter().flat_map(|url| {
        (0..args.repeat).map(move |_| {
            let mut builder = client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if let Some(data) = data {
                builder = builder.body(data.clone());
            }
            // 读完 body 后记录才会结束
            async move {
                let response = client.send(builder).await?;
                response.bytes().await.map(|_| ())
            }
        })
    });
    // 传输失败已经记录在历史中
    let outcomes = join_all(calls).await;
    let failed = outcomes.iter().filter(|o| o.is_err()).count();

    let snapshot = monitor.snapshot();
    print_records(&snapshot, args.verbose);
    println!(
        "{}",
        report::stats_table(&monitor.get_stats(), &monitor.get_percentiles())
    );
    println!("{}", report::breakdown_table(&stats::status_breakdown(&snapshot)));
    println!("{}", report::endpoints_table(&monitor.get_endpoints()));

    if failed > 0 {
        println!("{}", format!("{} request(s) failed in transport", failed).red());
    }

    if let Some(path) = &args.export {
        export(&monitor, path)?;
    }
    Ok(())
}

fn export(monitor: &NetworkMonitor, path: &Path) -> Result<()> {
    monitor
        .export()
        .write_to(path)
        .with_context(|| format!("Failed to export history to {}", path.display()))?;
    println!("{}", format!("History exported to {}", path.display()).green());
    Ok(())
}

pub fn inspect(args: InspectArgs) -> Result<()> {
    let document = ExportDocument::read_from(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let filter = build_filter(&args)?;

    if filter.is_empty() {
        println!("{}", report::render_document(&document));
        if args.verbose {
            let formatter = RecordFormatter::new();
            for record in document.records.iter() {
                println!("\n{}", formatter.format(record));
            }
        }
        return Ok(());
    }

    let records = stats::filter(&document.records, |r| filter.matches(r));
    if records.is_empty() {
        println!("{}", "No matching requests".yellow());
        return Ok(());
    }
    print_records(&records, args.verbose);
    println!(
        "{}",
        report::stats_table(
            &stats::compute_stats(&records),
            &stats::compute_percentiles(&records)
        )
    );
    Ok(())
}
