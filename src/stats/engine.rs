//! Pure aggregate computations over a history snapshot.
//!
//! Nothing here mutates its input. Percentages and durations are rounded to
//! one decimal place.

use crate::history::model::{LifecycleState, RequestRecord, StatusClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 汇总统计
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    /// 已终止且不成功的记录数
    pub errors: usize,
    pub error_rate_pct: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// 按规范化路径分组的统计，按需计算，不持久化
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EndpointAggregate {
    pub count: usize,
    pub error_count: usize,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn durations(snapshot: &[RequestRecord]) -> impl Iterator<Item = u64> + '_ {
    snapshot.iter().filter_map(|r| r.duration_ms)
}

fn mean(values: impl Iterator<Item = u64>) -> f64 {
    let (sum, count) = values.fold((0u64, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

pub fn compute_stats(snapshot: &[RequestRecord]) -> StatsSummary {
    let total = snapshot.len();
    let pending = snapshot.iter().filter(|r| r.is_pending()).count();
    let completed = snapshot
        .iter()
        .filter(|r| r.state == LifecycleState::Completed)
        .count();
    let errors = snapshot.iter().filter(|r| r.is_failure()).count();

    let error_rate_pct = if total > 0 {
        round1(errors as f64 / total as f64 * 100.0)
    } else {
        0.0
    };

    StatsSummary {
        total,
        completed,
        pending,
        errors,
        error_rate_pct,
        avg_duration_ms: round1(mean(durations(snapshot))),
    }
}

/// 排序后取 `sorted[floor(len * q)]`（不插值）
pub fn compute_percentiles(snapshot: &[RequestRecord]) -> Percentiles {
    let mut sorted: Vec<u64> = durations(snapshot).collect();
    if sorted.is_empty() {
        return Percentiles::default();
    }
    sorted.sort_unstable();

    let at = |q: f64| {
        let index = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
        round1(sorted[index] as f64)
    };

    Percentiles {
        p50: at(0.5),
        p95: at(0.95),
        p99: at(0.99),
    }
}

/// 去掉查询串，绝对 URL 只保留 path；无法解析时原样返回
pub fn normalize_endpoint(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => url.path().to_string(),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let path = raw.split(['?', '#']).next().unwrap_or(raw);
            if path.is_empty() {
                raw.to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => raw.to_string(),
    }
}

pub fn group_by_endpoint<N>(
    snapshot: &[RequestRecord],
    normalizer: N,
) -> BTreeMap<String, EndpointAggregate>
where
    N: Fn(&str) -> String,
{
    let mut groups: BTreeMap<String, (EndpointAggregate, usize)> = BTreeMap::new();

    for record in snapshot {
        let (aggregate, timed) = groups.entry(normalizer(&record.url)).or_default();
        aggregate.count += 1;
        if record.is_failure() {
            aggregate.error_count += 1;
        }
        if let Some(duration) = record.duration_ms {
            aggregate.total_duration_ms += duration;
            *timed += 1;
        }
    }

    groups
        .into_iter()
        .map(|(key, (mut aggregate, timed))| {
            if timed > 0 {
                aggregate.avg_duration_ms =
                    round1(aggregate.total_duration_ms as f64 / timed as f64);
            }
            (key, aggregate)
        })
        .collect()
}

/// 保持顺序的子序列
pub fn filter<P>(snapshot: &[RequestRecord], predicate: P) -> Vec<RequestRecord>
where
    P: Fn(&RequestRecord) -> bool,
{
    snapshot.iter().filter(|&r| predicate(r)).cloned().collect()
}

pub fn status_breakdown(snapshot: &[RequestRecord]) -> BTreeMap<StatusClass, usize> {
    let mut breakdown = BTreeMap::new();
    for class in snapshot.iter().filter_map(|r| r.status_class()) {
        *breakdown.entry(class).or_insert(0) += 1;
    }
    breakdown
}

/// 耗时最长的 n 条已终止记录，降序
pub fn slowest(snapshot: &[RequestRecord], n: usize) -> Vec<RequestRecord> {
    let mut timed: Vec<&RequestRecord> = snapshot
        .iter()
        .filter(|r| r.duration_ms.is_some())
        .collect();
    timed.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
    timed.into_iter().take(n).cloned().collect()
}
