//! Terminal rendering of history, statistics and single records.

use crate::history::{BodySnapshot, LifecycleState, RequestRecord, StatusClass};
use crate::monitor::ExportDocument;
use crate::stats::{self, EndpointAggregate, Percentiles, StatsSummary};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, Table};
use std::collections::BTreeMap;

/// 状态列的颜色：pending 黄色，成功绿色，其余红色
fn status_cell(record: &RequestRecord) -> Cell {
    match (record.state, record.status_code) {
        (LifecycleState::Pending, _) => Cell::new("pending").fg(Color::Yellow),
        (_, Some(code)) => Cell::new(code).fg(if record.success {
            Color::Green
        } else {
            Color::Red
        }),
        (_, None) => Cell::new(record.state).fg(Color::Red),
    }
}

fn short_id(id: &str) -> &str {
    let id = id.strip_prefix("req_").unwrap_or(id);
    id.get(..8).unwrap_or(id)
}

fn duration_text(duration_ms: Option<u64>) -> String {
    duration_ms
        .map(|d| format!("{}ms", d))
        .unwrap_or_else(|| "-".to_string())
}

pub fn history_table(records: &[RequestRecord]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["ID", "Time", "Method", "URL", "Status", "Duration"]);

    for record in records {
        table.add_row(vec![
            Cell::new(short_id(&record.id)),
            Cell::new(record.issued_at.format("%H:%M:%S%.3f")),
            Cell::new(&record.method),
            Cell::new(&record.url).add_attribute(Attribute::Dim),
            status_cell(record),
            Cell::new(duration_text(record.duration_ms)),
        ]);
    }
    table
}

pub fn stats_table(summary: &StatsSummary, percentiles: &Percentiles) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Metric", "Value"]);

    let error_color = if summary.errors > 0 {
        Color::Red
    } else {
        Color::Green
    };
    table.add_row(vec![Cell::new("Total"), Cell::new(summary.total)]);
    table.add_row(vec![Cell::new("Completed"), Cell::new(summary.completed)]);
    table.add_row(vec![Cell::new("Pending"), Cell::new(summary.pending)]);
    table.add_row(vec![
        Cell::new("Errors"),
        Cell::new(summary.errors).fg(error_color),
    ]);
    table.add_row(vec![
        Cell::new("Error rate"),
        Cell::new(format!("{}%", summary.error_rate_pct)).fg(error_color),
    ]);
    table.add_row(vec![
        Cell::new("Avg duration"),
        Cell::new(format!("{}ms", summary.avg_duration_ms)),
    ]);
    table.add_row(vec![Cell::new("p50"), Cell::new(format!("{}ms", percentiles.p50))]);
    table.add_row(vec![Cell::new("p95"), Cell::new(format!("{}ms", percentiles.p95))]);
    table.add_row(vec![Cell::new("p99"), Cell::new(format!("{}ms", percentiles.p99))]);
    table
}

pub fn endpoints_table(endpoints: &BTreeMap<String, EndpointAggregate>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Endpoint", "Calls", "Errors", "Avg duration"]);

    for (endpoint, aggregate) in endpoints {
        let errors = Cell::new(aggregate.error_count);
        table.add_row(vec![
            Cell::new(endpoint),
            Cell::new(aggregate.count),
            if aggregate.error_count > 0 {
                errors.fg(Color::Red)
            } else {
                errors
            },
            Cell::new(format!("{}ms", aggregate.avg_duration_ms)),
        ]);
    }
    table
}

pub fn breakdown_table(breakdown: &BTreeMap<StatusClass, usize>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Status", "Count"]);
    for (class, count) in breakdown {
        let color = match class {
            StatusClass::Success => Color::Green,
            StatusClass::ClientError => Color::Yellow,
            StatusClass::ServerError => Color::Red,
            _ => Color::Reset,
        };
        table.add_row(vec![Cell::new(class).fg(color), Cell::new(count)]);
    }
    table
}

/// 单条记录的详细输出
pub struct RecordFormatter {
    color: bool,
    show_headers: bool,
    show_body: bool,
}

impl Default for RecordFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordFormatter {
    pub fn new() -> Self {
        Self {
            color: true,
            show_headers: true,
            show_body: true,
        }
    }

    pub fn plain(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.show_headers = false;
        self
    }

    pub fn without_body(mut self) -> Self {
        self.show_body = false;
        self
    }

    pub fn format(&self, record: &RequestRecord) -> String {
        let mut output = Vec::new();

        let request_line = format!("{} {}", record.method, record.url);
        output.push(self.paint(request_line, |s| s.bold()));

        let status_line = match (record.state, record.status_code) {
            (LifecycleState::Pending, _) => "pending".to_string(),
            (_, Some(code)) => format!(
                "HTTP {} {}",
                code,
                record.status_text.as_deref().unwrap_or_default()
            ),
            (state, None) => state.to_string(),
        };
        let status_line = if record.is_pending() {
            self.paint(status_line, |s| s.yellow())
        } else if record.success {
            self.paint(status_line, |s| s.green())
        } else {
            self.paint(status_line, |s| s.red())
        };
        output.push(status_line);
        output.push(self.paint(
            format!("Time: {}", duration_text(record.duration_ms)),
            |s| s.cyan(),
        ));

        if let Some(error) = &record.error {
            output.push(self.paint(
                format!("Error ({}): {}", error.kind, error.message),
                |s| s.red(),
            ));
        }

        if self.show_headers && !record.response_headers.is_empty() {
            output.push(String::new());
            output.push(self.paint("Headers:".to_string(), |s| s.blue().bold()));
            for (key, value) in record.response_headers.iter() {
                let value = value.to_str().unwrap_or("<invalid utf-8>");
                output.push(self.paint(format!("   {}: {}", key, value), |s| s.blue()));
            }
        }

        if self.show_body
            && let Some(body) = &record.response_body
        {
            output.push(String::new());
            output.push(self.paint("Body:".to_string(), |s| s.blue().bold()));
            output.push(format_body(body));
        }

        output.join("\n")
    }

    fn paint(&self, text: String, style: impl Fn(&str) -> ColoredString) -> String {
        if self.color {
            style(&text).to_string()
        } else {
            text
        }
    }
}

fn format_body(body: &BodySnapshot) -> String {
    match body {
        BodySnapshot::Json(value) => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
        }
        BodySnapshot::Text(text) => text.clone(),
        BodySnapshot::Truncated {
            prefix,
            total_bytes,
        } => format!("{}\n... ({} bytes total)", prefix, total_bytes),
        BodySnapshot::Unreadable(reason) => reason.clone(),
    }
}

/// 导出文档的完整报告
pub fn render_document(document: &ExportDocument) -> String {
    let mut sections = vec![
        format!("Exported at {}", document.exported_at.to_rfc3339()),
        history_table(&document.records).to_string(),
        stats_table(&document.stats, &document.percentiles).to_string(),
    ];
    if !document.endpoints.is_empty() {
        sections.push(endpoints_table(&document.endpoints).to_string());
    }
    let slowest = stats::slowest(&document.records, 5);
    if !slowest.is_empty() {
        sections.push(format!("Slowest:\n{}", history_table(&slowest)));
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{CallStyle, RecordError, RecordPatch, Snapshot};
    use chrono::{DateTime, Utc};

    fn completed(id: &str, url: &str, status: u16, success: bool) -> RequestRecord {
        let issued_at = DateTime::<Utc>::default();
        let mut record =
            RequestRecord::pending(id.to_string(), CallStyle::Direct, "GET", url, issued_at);
        record.apply(
            RecordPatch::completed(issued_at + chrono::Duration::milliseconds(12))
                .with_status(status, "Status")
                .with_success(success)
                .with_error((!success).then(|| RecordError::http(status, "Status")))
                .with_body(BodySnapshot::from_text(r#"{"a":1}"#, None)),
        );
        record
    }

    #[test]
    fn test_history_table() {
        let records = vec![
            completed("req_0123456789abcdef", "/v1/leads", 200, true),
            RequestRecord::pending(
                "req_fedcba9876543210".to_string(),
                CallStyle::Evented,
                "POST",
                "/v1/escrows",
                DateTime::<Utc>::default(),
            ),
        ];
        let rendered = history_table(&records).to_string();
        assert!(rendered.contains("01234567"));
        assert!(!rendered.contains("req_"));
        assert!(rendered.contains("/v1/leads"));
        assert!(rendered.contains("12ms"));
        assert!(rendered.contains("pending"));
    }

    #[test]
    fn test_record_formatter_plain() {
        let record = completed("req_a", "/v1/leads/9", 404, false);
        let output = RecordFormatter::new().plain().format(&record);

        assert!(output.starts_with("GET /v1/leads/9"));
        assert!(output.contains("HTTP 404 Status"));
        assert!(output.contains("Time: 12ms"));
        assert!(output.contains("Error (http): HTTP 404: Status"));
        assert!(output.contains("\"a\": 1"));

        let output = RecordFormatter::new().plain().without_body().format(&record);
        assert!(!output.contains("Body:"));
    }

    #[test]
    fn test_render_document() {
        let records = Snapshot::from(vec![
            completed("req_1", "https://api.example.com/v1/leads?page=1", 200, true),
            completed("req_2", "https://api.example.com/v1/leads?page=2", 500, false),
        ]);
        let document = ExportDocument::from_snapshot(records, DateTime::<Utc>::default());
        let rendered = render_document(&document);
        assert!(rendered.contains("Exported at 1970-01-01"));
        assert!(rendered.contains("/v1/leads"));
        assert!(rendered.contains("50%"));
        assert!(rendered.contains("Slowest:"));
    }
}
