//! Report model and rendering.
//!
//! `Report::build` derives everything from a finished `LogAnalyzer`; the
//! `Display` impl renders it. Orderings are stable sorts over first-appearance
//! order, so identical input renders identically.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::NaiveDateTime;

use crate::analyzer::engine::LogAnalyzer;
use crate::analyzer::parser::{CallFailureKind, DbIncidentKind};

const TOP_HTTP: usize = 10;
const TOP_ENDPOINTS: usize = 10;
const TOP_SLOW_CALLS: usize = 20;
const HISTOGRAM_BAR_MAX: usize = 50;
const HISTOGRAM_BAR_UNIT: usize = 10;
const PEAK_WARNING: usize = 5;
const LONG_CALL_SECS: f64 = 10.0;

const RULE_WIDTH: usize = 70;

/// Fixed advice printed after the findings.
pub const RECOMMENDATIONS: [&str; 4] = [
    "If many timeouts appear, check the health of the backend API.",
    "If the concurrency peak is above 1, a single worker cannot keep up; serve requests concurrently.",
    "If one API call is especially slow, cache its result or optimise that endpoint.",
    "Add a timeout to every outbound call so none can hang forever.",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Totals {
    pub http_requests: usize,
    pub api_calls: usize,
    pub slow_calls: usize,
    pub timeouts: usize,
    pub concurrency_peak: usize,
    pub call_failures: usize,
    pub http_exceptions: usize,
    pub db_incidents: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
}

impl LatencySummary {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            mean: values.iter().sum::<f64>() / values.len() as f64,
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRow {
    pub elapsed: f64,
    pub method: String,
    pub path: String,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointStats {
    pub url: String,
    pub count: usize,
    pub mean: f64,
    pub max: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlowCallRow {
    pub timestamp: NaiveDateTime,
    pub elapsed: f64,
    pub caller: String,
    /// Target of the call, when its `REQ_START` was seen.
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutRow {
    pub timestamp: NaiveDateTime,
    pub url: String,
    pub elapsed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencySummary {
    pub mean: f64,
    pub max: usize,
    /// `(active_count, number of call starts)` by ascending level.
    pub histogram: Vec<(usize, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureRow {
    pub timestamp: NaiveDateTime,
    pub label: &'static str,
    pub subject: String,
    pub elapsed: Option<f64>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbSummary {
    pub slow_queries: usize,
    pub reconnects: usize,
    pub errors: usize,
    pub details: Vec<FailureRow>,
}

/// One heuristic conclusion.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
    Timeouts(usize),
    ConcurrencyPeak(usize),
    LongCall(f64),
    TopSlowCaller { caller: String, count: usize },
    DbReconnects(usize),
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Timeouts(n) => write!(f, "! {} timeouts found: the backend API is not responding", n),
            Finding::ConcurrencyPeak(n) => write!(
                f,
                "! Concurrency peaked at {}, beyond what a single worker can serve",
                n
            ),
            Finding::LongCall(secs) => write!(
                f,
                "! Very long API call found ({:.3}s); it can block the worker",
                secs
            ),
            Finding::TopSlowCaller { caller, count } => {
                write!(f, "! Slowest call site: {} ({} times)", caller, count)
            }
            Finding::DbReconnects(n) => write!(
                f,
                "! Database connection was re-established {} times; check for concurrent use of the shared connection",
                n
            ),
        }
    }
}

/// The full analysis result.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub totals: Totals,
    pub http_latency: Option<LatencySummary>,
    pub slowest_http: Vec<HttpRow>,
    pub api_latency: Option<LatencySummary>,
    pub endpoints: Vec<EndpointStats>,
    pub slow_calls: Vec<SlowCallRow>,
    pub timeouts: Vec<TimeoutRow>,
    pub concurrency: Option<ConcurrencySummary>,
    pub call_failures: Vec<FailureRow>,
    pub http_exceptions: Vec<FailureRow>,
    pub db: DbSummary,
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn build(analyzer: &LogAnalyzer) -> Self {
        let http = analyzer.http_requests();
        let calls = analyzer.api_calls();

        let totals = Totals {
            http_requests: http.len(),
            api_calls: calls.len(),
            slow_calls: analyzer.slow_calls().len(),
            timeouts: analyzer.timeouts().len(),
            concurrency_peak: analyzer.concurrency_peak(),
            call_failures: analyzer.call_failures().len(),
            http_exceptions: analyzer.http_failures().len(),
            db_incidents: analyzer.db_incidents().len(),
        };

        // HTTP latency
        let http_elapsed: Vec<f64> = http.values().filter_map(|r| r.elapsed).collect();
        let mut slowest_http: Vec<HttpRow> = http
            .values()
            .filter_map(|r| {
                r.elapsed.map(|elapsed| HttpRow {
                    elapsed,
                    method: r.method.clone(),
                    path: r.path.clone(),
                    status: r.status.clone(),
                })
            })
            .collect();
        slowest_http.sort_by(|a, b| b.elapsed.total_cmp(&a.elapsed));
        slowest_http.truncate(TOP_HTTP);

        // API latency by endpoint
        let api_elapsed: Vec<f64> = calls.values().filter_map(|c| c.elapsed).collect();
        let mut endpoints: Vec<EndpointStats> = Vec::new();
        let mut endpoint_index: HashMap<&str, usize> = HashMap::new();
        for call in calls.values() {
            let Some(elapsed) = call.elapsed else { continue };
            let pos = *endpoint_index.entry(call.url.as_str()).or_insert_with(|| {
                endpoints.push(EndpointStats {
                    url: call.url.clone(),
                    count: 0,
                    mean: 0.0,
                    max: 0.0,
                    total: 0.0,
                });
                endpoints.len() - 1
            });
            let stats = &mut endpoints[pos];
            stats.count += 1;
            stats.total += elapsed;
            stats.max = stats.max.max(elapsed);
        }
        for stats in &mut endpoints {
            stats.mean = stats.total / stats.count as f64;
        }
        endpoints.sort_by(|a, b| b.total.total_cmp(&a.total));
        endpoints.truncate(TOP_ENDPOINTS);

        // Slow calls
        let mut slow_calls: Vec<SlowCallRow> = analyzer
            .slow_calls()
            .iter()
            .map(|s| SlowCallRow {
                timestamp: s.timestamp,
                elapsed: s.elapsed,
                caller: s.caller.clone(),
                url: calls.get(&s.id).map(|c| c.url.clone()),
            })
            .collect();
        slow_calls.sort_by(|a, b| b.elapsed.total_cmp(&a.elapsed));
        slow_calls.truncate(TOP_SLOW_CALLS);

        let timeouts = analyzer
            .timeouts()
            .iter()
            .map(|t| TimeoutRow {
                timestamp: t.timestamp,
                url: t.url.clone(),
                elapsed: t.elapsed,
            })
            .collect();

        // Concurrency
        let active_counts: Vec<usize> = calls.values().map(|c| c.active_count_start).collect();
        let concurrency = if active_counts.is_empty() {
            None
        } else {
            let mut histogram: BTreeMap<usize, usize> = BTreeMap::new();
            for &count in &active_counts {
                *histogram.entry(count).or_default() += 1;
            }
            Some(ConcurrencySummary {
                mean: active_counts.iter().sum::<usize>() as f64 / active_counts.len() as f64,
                max: active_counts.iter().copied().max().unwrap_or(0),
                histogram: histogram.into_iter().collect(),
            })
        };

        // Failures
        let call_failures = analyzer
            .call_failures()
            .iter()
            .map(|c| FailureRow {
                timestamp: c.timestamp,
                label: match c.kind {
                    CallFailureKind::Connection => "connection error",
                    CallFailureKind::Exception => "exception",
                },
                subject: format!("{} (caller {})", c.url, c.caller),
                elapsed: Some(c.elapsed),
                error: c.error.clone(),
            })
            .collect();

        let http_exceptions = analyzer
            .http_failures()
            .iter()
            .map(|h| FailureRow {
                timestamp: h.timestamp,
                label: "http exception",
                subject: format!("{} {}", h.method, h.path),
                elapsed: h.elapsed,
                error: h.error.clone(),
            })
            .collect();

        let mut db = DbSummary::default();
        for incident in analyzer.db_incidents() {
            let label = match incident.kind {
                DbIncidentKind::Slow => {
                    db.slow_queries += 1;
                    "slow query"
                }
                DbIncidentKind::Reconnect => {
                    db.reconnects += 1;
                    "reconnect"
                }
                DbIncidentKind::Error => {
                    db.errors += 1;
                    "error"
                }
            };
            db.details.push(FailureRow {
                timestamp: incident.timestamp,
                label,
                subject: format!("{} [{}]", incident.sql, incident.thread),
                elapsed: Some(incident.elapsed),
                error: incident.error.clone().unwrap_or_default(),
            });
        }

        // Findings
        let mut findings = Vec::new();
        if totals.timeouts > 0 {
            findings.push(Finding::Timeouts(totals.timeouts));
        }
        if totals.concurrency_peak > PEAK_WARNING {
            findings.push(Finding::ConcurrencyPeak(totals.concurrency_peak));
        }
        if let Some(api) = LatencySummary::of(&api_elapsed) {
            if api.max > LONG_CALL_SECS {
                findings.push(Finding::LongCall(api.max));
            }
        }
        if let Some((caller, count)) = top_slow_caller(analyzer) {
            findings.push(Finding::TopSlowCaller { caller, count });
        }
        if db.reconnects > 0 {
            findings.push(Finding::DbReconnects(db.reconnects));
        }

        Self {
            totals,
            http_latency: LatencySummary::of(&http_elapsed),
            slowest_http,
            api_latency: LatencySummary::of(&api_elapsed),
            endpoints,
            slow_calls,
            timeouts,
            concurrency,
            call_failures,
            http_exceptions,
            db,
            findings,
        }
    }
}

/// Most frequent caller among slow calls; the first to reach the top count wins.
fn top_slow_caller(analyzer: &LogAnalyzer) -> Option<(String, usize)> {
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for slow in analyzer.slow_calls() {
        let count = counts.entry(slow.caller.as_str()).or_insert_with(|| {
            order.push(slow.caller.as_str());
            0
        });
        *count += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for caller in order {
        let count = counts[caller];
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((caller, count));
        }
    }
    best.map(|(caller, count)| (caller.to_string(), count))
}

fn heading(f: &mut fmt::Formatter<'_>, title: &str) -> fmt::Result {
    writeln!(f)?;
    writeln!(f, "[{}]", title)?;
    writeln!(f, "{}", "-".repeat(RULE_WIDTH))
}

fn clock(ts: &NaiveDateTime) -> String {
    ts.format("%H:%M:%S").to_string()
}

fn failure_lines(f: &mut fmt::Formatter<'_>, rows: &[FailureRow]) -> fmt::Result {
    for row in rows {
        write!(f, "  [{}] {}: {}", clock(&row.timestamp), row.label, row.subject)?;
        if let Some(elapsed) = row.elapsed {
            write!(f, " after {:.3}s", elapsed)?;
        }
        if row.error.is_empty() {
            writeln!(f)?;
        } else {
            writeln!(f, " - {}", row.error)?;
        }
    }
    Ok(())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{}", rule)?;
        writeln!(f, "Log Analysis Report")?;
        writeln!(f, "{}", rule)?;

        let t = &self.totals;
        heading(f, "1. Overall")?;
        writeln!(f, "HTTP requests: {}", t.http_requests)?;
        writeln!(f, "API calls: {}", t.api_calls)?;
        writeln!(f, "Slow calls: {}", t.slow_calls)?;
        writeln!(f, "Timeouts: {}", t.timeouts)?;
        writeln!(f, "Concurrency peak: {}", t.concurrency_peak)?;
        writeln!(f, "Call failures: {}", t.call_failures)?;
        writeln!(f, "HTTP exceptions: {}", t.http_exceptions)?;
        writeln!(f, "Database incidents: {}", t.db_incidents)?;

        heading(f, "2. HTTP Latency")?;
        if let Some(http) = &self.http_latency {
            writeln!(f, "Mean: {:.3}s", http.mean)?;
            writeln!(f, "Max: {:.3}s", http.max)?;
            writeln!(f, "Min: {:.3}s", http.min)?;
            writeln!(f)?;
            writeln!(f, "Slowest {} HTTP requests:", TOP_HTTP)?;
            for row in &self.slowest_http {
                writeln!(
                    f,
                    "  {:.3}s - {} {} (status={})",
                    row.elapsed,
                    row.method,
                    row.path,
                    row.status.as_deref().unwrap_or("unknown")
                )?;
            }
        }

        heading(f, "3. API Call Latency")?;
        if let Some(api) = &self.api_latency {
            writeln!(f, "Mean: {:.3}s", api.mean)?;
            writeln!(f, "Max: {:.3}s", api.max)?;
            writeln!(f)?;
            writeln!(f, "By endpoint (top {}):", TOP_ENDPOINTS)?;
            for stats in &self.endpoints {
                writeln!(f, "  {}", stats.url)?;
                writeln!(
                    f,
                    "    calls: {}, mean: {:.3}s, max: {:.3}s, total: {:.3}s",
                    stats.count, stats.mean, stats.max, stats.total
                )?;
            }
        }

        if !self.slow_calls.is_empty() {
            heading(f, "4. Slow Calls (>2s)")?;
            for row in &self.slow_calls {
                writeln!(f, "  [{}] elapsed: {:.3}s", clock(&row.timestamp), row.elapsed)?;
                writeln!(f, "    caller: {}", row.caller)?;
                if let Some(url) = &row.url {
                    writeln!(f, "    URL: {}", url)?;
                }
                writeln!(f)?;
            }
        }

        if !self.timeouts.is_empty() {
            heading(f, "5. Timeouts")?;
            for row in &self.timeouts {
                writeln!(
                    f,
                    "  [{}] timed out URL: {} (waited {:.3}s)",
                    clock(&row.timestamp),
                    row.url,
                    row.elapsed
                )?;
            }
        }

        heading(f, "6. Concurrency")?;
        if let Some(concurrency) = &self.concurrency {
            writeln!(f, "Mean concurrency: {:.1}", concurrency.mean)?;
            writeln!(f, "Max concurrency: {}", concurrency.max)?;
            writeln!(f)?;
            writeln!(f, "Distribution:")?;
            for (level, count) in &concurrency.histogram {
                writeln!(
                    f,
                    "  concurrency={}: {} times ({})",
                    level,
                    count,
                    "#".repeat((count / HISTOGRAM_BAR_UNIT).min(HISTOGRAM_BAR_MAX))
                )?;
            }
        }

        if !self.call_failures.is_empty() || !self.http_exceptions.is_empty() || !self.db.details.is_empty() {
            heading(f, "7. Failures and Database Incidents")?;
            failure_lines(f, &self.call_failures)?;
            failure_lines(f, &self.http_exceptions)?;
            if !self.db.details.is_empty() {
                writeln!(
                    f,
                    "Database: {} slow queries, {} reconnects, {} errors",
                    self.db.slow_queries, self.db.reconnects, self.db.errors
                )?;
                failure_lines(f, &self.db.details)?;
            }
        }

        heading(f, "8. Findings and Recommendations")?;
        if self.findings.is_empty() {
            writeln!(f, "No obvious anomalies found")?;
        } else {
            for finding in &self.findings {
                writeln!(f, "{}", finding)?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Recommendations:")?;
        for (n, advice) in RECOMMENDATIONS.iter().enumerate() {
            writeln!(f, "{}. {}", n + 1, advice)?;
        }
        writeln!(f)?;
        writeln!(f, "{}", rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(log: &str) -> Report {
        let mut analyzer = LogAnalyzer::new();
        analyzer.analyze_str(log);
        analyzer.report()
    }

    #[test]
    fn test_empty_input() {
        let report = report("");
        assert_eq!(report.totals, Totals::default());
        assert!(report.http_latency.is_none());
        assert!(report.concurrency.is_none());
        assert!(report.findings.is_empty());

        let text = report.to_string();
        assert!(text.contains("No obvious anomalies found"));
        assert!(!text.contains("[4. Slow Calls"));
        assert!(text.contains("Add a timeout to every outbound call"));
    }

    #[test]
    fn test_endpoints_sorted_by_total() {
        let report = report(
            "\
2026-10-14 10:00:00 WARN [REQ_START] id=1 method=GET url=/a caller=c thread=t active_count=0
2026-10-14 10:00:01 WARN [REQ_END] id=1 elapsed=1.000s active_count=0
2026-10-14 10:00:01 WARN [REQ_START] id=2 method=GET url=/b caller=c thread=t active_count=0
2026-10-14 10:00:03 WARN [REQ_END] id=2 elapsed=1.500s active_count=0
2026-10-14 10:00:03 WARN [REQ_START] id=3 method=GET url=/a caller=c thread=t active_count=0
2026-10-14 10:00:04 WARN [REQ_END] id=3 elapsed=1.000s active_count=0
",
        );
        let urls: Vec<&str> = report.endpoints.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["/a", "/b"]);
        assert_eq!(report.endpoints[0].count, 2);
        assert_eq!(report.endpoints[0].total, 2.0);
        assert_eq!(report.endpoints[0].mean, 1.0);
    }

    #[test]
    fn test_slow_calls_correlate_url() {
        let report = report(
            "\
2026-10-14 10:00:00 WARN [REQ_START] id=1 method=GET url=/slow caller=c thread=t active_count=0
2026-10-14 10:00:05 ERROR [REQ_SLOW] id=1 method=GET url=/slow elapsed=5.000s caller=view/a.rs:1:f
2026-10-14 10:00:06 ERROR [REQ_SLOW] id=99 method=GET url=/other elapsed=6.000s caller=view/b.rs:2:g
2026-10-14 10:00:07 ERROR [REQ_SLOW] id=98 method=GET url=/other elapsed=2.500s caller=view/b.rs:2:g
",
        );
        assert_eq!(report.slow_calls[0].elapsed, 6.0);
        assert_eq!(report.slow_calls[0].url, None);
        assert_eq!(report.slow_calls[1].url.as_deref(), Some("/slow"));
        assert!(report.findings.contains(&Finding::TopSlowCaller {
            caller: "view/b.rs:2:g".into(),
            count: 2
        }));
    }

    #[test]
    fn test_top_slow_caller_tie_goes_to_first_seen() {
        let report = report(
            "\
2026-10-14 10:00:00 ERROR [REQ_SLOW] id=1 method=GET url=/a elapsed=3.000s caller=first
2026-10-14 10:00:01 ERROR [REQ_SLOW] id=2 method=GET url=/b elapsed=9.000s caller=second
",
        );
        assert_eq!(
            report.findings,
            vec![Finding::TopSlowCaller { caller: "first".into(), count: 1 }]
        );
    }

    #[test]
    fn test_findings_thresholds() {
        let mut log = String::new();
        for id in 0..7 {
            log.push_str(&format!(
                "2026-10-14 10:00:00 WARN [REQ_START] id={} method=GET url=/a caller=c thread=t active_count={}\n",
                id, id
            ));
        }
        log.push_str("2026-10-14 10:00:12 WARN [REQ_END] id=0 elapsed=12.000s active_count=6\n");
        log.push_str("2026-10-14 10:00:12 ERROR [REQ_TIMEOUT] id=1 method=GET url=/a elapsed=30.000s\n");
        log.push_str("2026-10-14 10:00:12 ERROR [DB_RECONNECT] thread=t sql=SELECT 1 elapsed=0.010s error=gone away\n");

        let report = report(&log);
        assert_eq!(
            report.findings,
            vec![
                Finding::Timeouts(1),
                Finding::ConcurrencyPeak(6),
                Finding::LongCall(12.0),
                Finding::DbReconnects(1),
            ]
        );
        assert_eq!(report.db.reconnects, 1);
        assert!(report.to_string().contains("[7. Failures and Database Incidents]"));
    }

    #[test]
    fn test_histogram_bar() {
        let mut log = String::new();
        for id in 0..25 {
            log.push_str(&format!(
                "2026-10-14 10:00:00 WARN [REQ_START] id={} method=GET url=/a caller=c thread=t active_count=1\n",
                id
            ));
        }
        let text = report(&log).to_string();
        assert!(text.contains("  concurrency=1: 25 times (##)\n"));
    }
}
