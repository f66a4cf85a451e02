//! Windowed compliance and risk reporting
//!
//! [`build_report`] is a pure function over a snapshot of entries and
//! registrations; [`AggregationEngine`] takes those snapshots and
//! [`ReportHistory`] keeps the rolling list of scheduled reports.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditEntry, EventType, LogLevel};
use crate::audit_store::AuditStore;
use crate::errors::{AuditResult, SafeLock};
use crate::service_registry::{ServiceRegistration, ServiceRegistry, ServiceStatus};

pub const TOP_USER_LIMIT: usize = 10;
pub const DEFAULT_REPORT_HISTORY: usize = 168;

const HIGH_ACTIVITY_EVENTS: usize = 50;
const VIOLATION_WEIGHT: f64 = 50.0;
const CRITICAL_WEIGHT: f64 = 30.0;
const FAILED_PHI_WEIGHT: f64 = 40.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportWindow {
    #[default]
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl ReportWindow {
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ReportWindow::Hourly => now - Duration::hours(1),
            ReportWindow::Daily => now - Duration::hours(24),
            ReportWindow::Weekly => now - Duration::days(7),
            ReportWindow::Monthly => now
                .checked_sub_months(Months::new(1))
                .unwrap_or(now - Duration::days(30)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportWindow::Hourly => "hourly",
            ReportWindow::Daily => "daily",
            ReportWindow::Weekly => "weekly",
            ReportWindow::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(ReportWindow::Hourly),
            "daily" => Ok(ReportWindow::Daily),
            "weekly" => Ok(ReportWindow::Weekly),
            "monthly" => Ok(ReportWindow::Monthly),
            other => Err(format!("unknown report window '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportPeriod {
    pub window: ReportWindow,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_id: String,
    pub event_count: usize,
    pub phi_access_count: usize,
    pub failed_count: usize,
    pub high_severity_count: usize,
    pub risk_score: f64,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealthSummary {
    pub service_name: String,
    /// Registry status, `None` for producers that never registered.
    pub status: Option<ServiceStatus>,
    pub event_count: usize,
    pub failure_count: usize,
    pub error_rate: f64,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Point-in-time snapshot; never mutated after [`build_report`] returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub report_period: ReportPeriod,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_service: BTreeMap<String, usize>,
    pub events_by_level: BTreeMap<String, usize>,
    pub phi_access_events: usize,
    pub security_events: usize,
    pub compliance_score: f64,
    pub top_users: Vec<UserActivity>,
    pub service_health: Vec<ServiceHealthSummary>,
    pub recommendations: Vec<String>,
}

#[derive(Default)]
struct UserTally {
    events: usize,
    phi: usize,
    failed: usize,
    high_severity: usize,
    last_activity: Option<DateTime<Utc>>,
}

/// 0–100 risk for one user's activity inside a window.
pub fn user_risk_score(events: usize, high_severity: usize, phi: usize, failed: usize) -> f64 {
    if events == 0 {
        return 0.0;
    }
    let n = events as f64;
    let mut score = 20.0 * high_severity as f64;
    if events > HIGH_ACTIVITY_EVENTS {
        score += 10.0;
    }
    if phi as f64 > n / 3.0 {
        score += 15.0;
    }
    if failed as f64 > n / 10.0 {
        score += 20.0;
    }
    score.clamp(0.0, 100.0)
}

/// 0–100 compliance score; an empty window is fully compliant.
pub fn compliance_score(total: usize, violations: usize, critical: usize, failed_phi: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let n = total as f64;
    let score = 100.0
        - (violations as f64 / n) * VIOLATION_WEIGHT
        - (critical as f64 / n) * CRITICAL_WEIGHT
        - (failed_phi as f64 / n) * FAILED_PHI_WEIGHT;
    score.clamp(0.0, 100.0)
}

/// Rules are checked in a fixed order so identical input yields identical
/// output.
pub fn recommendations(
    score: f64,
    total: usize,
    phi_events: usize,
    failed_events: usize,
    security_events: usize,
    degraded_services: &[String],
) -> Vec<String> {
    let mut recs = Vec::new();

    // Score bands are exclusive: below 80 gets the review, not also monitoring.
    if score < 80.0 {
        recs.push(format!(
            "Immediate compliance review required: compliance score {score:.1} is below 80"
        ));
    } else if score < 90.0 {
        recs.push(format!(
            "Implement additional audit monitoring: compliance score {score:.1} is below 90"
        ));
    }

    if total > 0 {
        let n = total as f64;
        if phi_events as f64 / n > 0.30 {
            recs.push(format!(
                "Review PHI access controls: {:.0}% of events accessed protected health information",
                phi_events as f64 / n * 100.0
            ));
        }
        if failed_events as f64 / n > 0.10 {
            recs.push(format!(
                "Investigate elevated failure rate ({:.0}%): check for system issues or user training needs",
                failed_events as f64 / n * 100.0
            ));
        }
    }

    if security_events > 0 {
        recs.push(format!(
            "Investigate {security_events} security event(s) recorded in this period"
        ));
    }
    if !degraded_services.is_empty() {
        recs.push(format!(
            "Restore connectivity for degraded services: {}",
            degraded_services.join(", ")
        ));
    }
    recs
}

/// Computes a report over `entries` (already limited to the window or not:
/// entries at or before the period start are skipped here).
pub fn build_report(
    entries: &[AuditEntry],
    services: &[ServiceRegistration],
    window: ReportWindow,
    now: DateTime<Utc>,
) -> AggregationReport {
    let start = window.period_start(now);

    let mut events_by_type = BTreeMap::new();
    let mut events_by_service = BTreeMap::new();
    let mut events_by_level = BTreeMap::new();
    let mut users: HashMap<&str, UserTally> = HashMap::new();
    let mut per_service: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    let mut total = 0;
    let mut phi_events = 0;
    let mut security_events = 0;
    let mut violations = 0;
    let mut critical = 0;
    let mut failed_phi = 0;
    let mut failed = 0;

    for entry in entries.iter().filter(|e| e.timestamp > start) {
        total += 1;
        *events_by_type
            .entry(entry.event_type.as_str().to_string())
            .or_insert(0) += 1;
        *events_by_service
            .entry(entry.service_name.clone())
            .or_insert(0) += 1;
        *events_by_level
            .entry(entry.log_level.as_str().to_string())
            .or_insert(0) += 1;

        let succeeded = entry.succeeded();
        if entry.phi_accessed {
            phi_events += 1;
            if !succeeded {
                failed_phi += 1;
            }
        }
        if entry.event_type.is_security_event() {
            security_events += 1;
        }
        if entry.event_type == EventType::ComplianceViolation {
            violations += 1;
        }
        if entry.log_level == LogLevel::Critical {
            critical += 1;
        }
        if !succeeded {
            failed += 1;
        }

        let service = per_service.entry(entry.service_name.as_str()).or_insert((0, 0));
        service.0 += 1;
        if !succeeded || entry.log_level.is_error_or_worse() {
            service.1 += 1;
        }

        if let Some(user_id) = entry.user_id.as_deref().filter(|u| !u.is_empty()) {
            let tally = users.entry(user_id).or_default();
            tally.events += 1;
            if entry.log_level.is_error_or_worse() {
                tally.high_severity += 1;
            }
            if entry.phi_accessed {
                tally.phi += 1;
            }
            if !succeeded {
                tally.failed += 1;
            }
            tally.last_activity = Some(match tally.last_activity {
                Some(seen) if seen >= entry.timestamp => seen,
                _ => entry.timestamp,
            });
        }
    }

    let mut top_users: Vec<UserActivity> = users
        .into_iter()
        .map(|(user_id, t)| UserActivity {
            user_id: user_id.to_string(),
            event_count: t.events,
            phi_access_count: t.phi,
            failed_count: t.failed,
            high_severity_count: t.high_severity,
            risk_score: user_risk_score(t.events, t.high_severity, t.phi, t.failed),
            last_activity: t.last_activity.unwrap_or(now),
        })
        .collect();
    top_users.sort_by(|a, b| {
        b.event_count
            .cmp(&a.event_count)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    top_users.truncate(TOP_USER_LIMIT);

    let service_health = service_health(&per_service, services);
    let degraded: Vec<String> = services
        .iter()
        .filter(|s| s.status != ServiceStatus::Active)
        .map(|s| s.service_name.clone())
        .collect();

    let score = compliance_score(total, violations, critical, failed_phi);
    let recommendations =
        recommendations(score, total, phi_events, failed, security_events, &degraded);

    AggregationReport {
        report_id: Uuid::new_v4().to_string(),
        generated_at: now,
        report_period: ReportPeriod {
            window,
            start,
            end: now,
        },
        total_events: total,
        events_by_type,
        events_by_service,
        events_by_level,
        phi_access_events: phi_events,
        security_events,
        compliance_score: score,
        top_users,
        service_health,
        recommendations,
    }
}

fn service_health(
    per_service: &BTreeMap<&str, (usize, usize)>,
    services: &[ServiceRegistration],
) -> Vec<ServiceHealthSummary> {
    let registered: BTreeMap<&str, &ServiceRegistration> = services
        .iter()
        .map(|s| (s.service_name.as_str(), s))
        .collect();

    let mut names: Vec<&str> = per_service.keys().copied().collect();
    names.extend(registered.keys().copied());
    names.sort_unstable();
    names.dedup();

    names
        .into_iter()
        .map(|name| {
            let (event_count, failure_count) = per_service.get(name).copied().unwrap_or((0, 0));
            let registration = registered.get(name);
            ServiceHealthSummary {
                service_name: name.to_string(),
                status: registration.map(|r| r.status),
                event_count,
                failure_count,
                error_rate: if event_count == 0 {
                    0.0
                } else {
                    failure_count as f64 / event_count as f64
                },
                last_seen: registration.and_then(|r| r.last_seen),
            }
        })
        .collect()
}

pub struct AggregationEngine {
    store: Arc<dyn AuditStore>,
    registry: Arc<ServiceRegistry>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn AuditStore>, registry: Arc<ServiceRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn generate_report(&self, window: ReportWindow) -> AuditResult<AggregationReport> {
        self.generate_report_at(window, Utc::now())
    }

    pub fn generate_report_at(
        &self,
        window: ReportWindow,
        now: DateTime<Utc>,
    ) -> AuditResult<AggregationReport> {
        let entries = self.store.entries_since(window.period_start(now))?;
        let services = self.registry.list_services()?;
        let report = build_report(&entries, &services, window, now);
        tracing::debug!(
            report_id = %report.report_id,
            window = %window,
            total_events = report.total_events,
            compliance_score = report.compliance_score,
            "aggregation report generated"
        );
        Ok(report)
    }
}

/// Rolling list of scheduled reports, oldest evicted first.
pub struct ReportHistory {
    reports: Mutex<VecDeque<AggregationReport>>,
    limit: usize,
}

impl ReportHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            reports: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn push(&self, report: AggregationReport) -> AuditResult<()> {
        let mut reports = self.reports.safe_lock("report_history")?;
        reports.push_back(report);
        while reports.len() > self.limit {
            reports.pop_front();
        }
        Ok(())
    }

    /// The `limit` most recent reports, oldest first.
    pub fn recent(&self, limit: usize) -> AuditResult<Vec<AggregationReport>> {
        let reports = self.reports.safe_lock("report_history")?;
        let skip = reports.len().saturating_sub(limit);
        Ok(reports.iter().skip(skip).cloned().collect())
    }

    pub fn len(&self) -> AuditResult<usize> {
        Ok(self.reports.safe_lock("report_history")?.len())
    }

    pub fn is_empty(&self) -> AuditResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::MemoryAuditStore;

    fn at(now: DateTime<Utc>, minutes_ago: i64) -> DateTime<Utc> {
        now - Duration::minutes(minutes_ago)
    }

    fn entry(event_type: EventType, user: &str, now: DateTime<Utc>) -> AuditEntry {
        AuditEntry::new(event_type, "portal", "act")
            .with_user(user)
            .with_timestamp(at(now, 5))
    }

    fn scenario_b(now: DateTime<Utc>) -> Vec<AuditEntry> {
        vec![
            entry(EventType::ComplianceViolation, "u1", now)
                .with_severity(LogLevel::Critical)
                .with_phi(true),
            entry(EventType::PhiAccess, "u2", now)
                .with_phi(true)
                .with_severity(LogLevel::Error)
                .with_failure("denied"),
            entry(EventType::Login, "u3", now),
        ]
    }

    #[test]
    fn empty_window_scores_one_hundred() {
        let report = build_report(&[], &[], ReportWindow::Hourly, Utc::now());
        assert_eq!(report.total_events, 0);
        assert_eq!(report.compliance_score, 100.0);
        assert!(report.recommendations.is_empty());
        assert!(report.top_users.is_empty());
    }

    #[test]
    fn mixed_window_matches_expected_tallies() {
        let now = Utc::now();
        let report = build_report(&scenario_b(now), &[], ReportWindow::Hourly, now);

        assert_eq!(report.total_events, 3);
        assert_eq!(report.phi_access_events, 2);
        assert_eq!(report.security_events, 1);
        assert!(report.compliance_score < 80.0);
        assert!(!report.recommendations.is_empty());
        assert!(report.recommendations[0].starts_with("Immediate compliance review"));
        assert_eq!(report.events_by_type["compliance_violation"], 1);
        assert_eq!(report.events_by_level["critical"], 1);
        assert_eq!(report.events_by_service["portal"], 3);
    }

    #[test]
    fn entries_outside_the_window_are_ignored() {
        let now = Utc::now();
        let old = entry(EventType::Login, "u1", now).with_timestamp(at(now, 61));
        let boundary = entry(EventType::Login, "u1", now).with_timestamp(at(now, 60));
        let fresh = entry(EventType::Login, "u1", now);

        let report = build_report(&[old.clone(), boundary, fresh], &[], ReportWindow::Hourly, now);
        assert_eq!(report.total_events, 1);

        let daily = build_report(&[old], &[], ReportWindow::Daily, now);
        assert_eq!(daily.total_events, 1);
    }

    #[test]
    fn compliance_score_is_bounded() {
        assert_eq!(compliance_score(1, 1, 1, 1), 0.0);
        assert_eq!(compliance_score(10, 0, 0, 0), 100.0);
        let s = compliance_score(4, 1, 1, 0);
        assert!((0.0..=100.0).contains(&s));
        assert!((s - 80.0).abs() < 1e-9);
    }

    #[test]
    fn adding_a_violation_never_raises_the_score() {
        let now = Utc::now();
        let mut entries = vec![
            entry(EventType::Login, "u1", now),
            entry(EventType::PhiAccess, "u2", now).with_phi(true),
            entry(EventType::DataExport, "u3", now).with_severity(LogLevel::Critical),
        ];
        let mut previous = build_report(&entries, &[], ReportWindow::Hourly, now).compliance_score;

        for _ in 0..5 {
            entries.push(entry(EventType::ComplianceViolation, "u4", now));
            let score = build_report(&entries, &[], ReportWindow::Hourly, now).compliance_score;
            assert!(score <= previous);
            previous = score;
        }
    }

    #[test]
    fn risk_score_components_and_clamp() {
        assert_eq!(user_risk_score(0, 0, 0, 0), 0.0);
        assert_eq!(user_risk_score(10, 0, 0, 0), 0.0);
        assert_eq!(user_risk_score(10, 1, 0, 0), 20.0);
        assert_eq!(user_risk_score(51, 0, 0, 0), 10.0);
        assert_eq!(user_risk_score(9, 0, 4, 0), 15.0);
        assert_eq!(user_risk_score(9, 0, 3, 0), 0.0);
        assert_eq!(user_risk_score(20, 0, 0, 3), 20.0);
        assert_eq!(user_risk_score(60, 10, 60, 60), 100.0);
    }

    #[test]
    fn risk_scores_stay_within_bounds() {
        let now = Utc::now();
        let mut entries = Vec::new();
        for i in 0..80 {
            let mut e = entry(EventType::PhiAccess, "heavy", now)
                .with_phi(true)
                .with_severity(LogLevel::Critical);
            if i % 2 == 0 {
                e = e.with_failure("denied");
            }
            entries.push(e);
        }
        entries.push(entry(EventType::Login, "light", now));

        let report = build_report(&entries, &[], ReportWindow::Hourly, now);
        for user in &report.top_users {
            assert!((0.0..=100.0).contains(&user.risk_score));
        }
        assert_eq!(report.top_users[0].user_id, "heavy");
        assert_eq!(report.top_users[0].risk_score, 100.0);
        assert_eq!(report.top_users[1].risk_score, 0.0);
    }

    #[test]
    fn top_users_capped_and_sorted() {
        let now = Utc::now();
        let mut entries = Vec::new();
        for u in 0..15 {
            for _ in 0..=u {
                entries.push(entry(EventType::ApiAccess, &format!("user-{u:02}"), now));
            }
        }
        let report = build_report(&entries, &[], ReportWindow::Hourly, now);
        assert_eq!(report.top_users.len(), TOP_USER_LIMIT);
        assert_eq!(report.top_users[0].user_id, "user-14");
        assert!(report
            .top_users
            .windows(2)
            .all(|w| w[0].event_count >= w[1].event_count));
    }

    #[test]
    fn recommendations_are_reproducible_and_ordered() {
        let recs = recommendations(85.0, 10, 4, 2, 0, &[]);
        assert_eq!(recs.len(), 3);
        assert!(recs[0].starts_with("Implement additional audit monitoring"));
        assert!(recs[1].starts_with("Review PHI access controls"));
        assert!(recs[2].starts_with("Investigate elevated failure rate"));
        assert_eq!(recs, recommendations(85.0, 10, 4, 2, 0, &[]));

        let degraded = recommendations(95.0, 10, 0, 0, 1, &["svc-x".to_string()]);
        assert_eq!(degraded.len(), 2);
        assert!(degraded[1].contains("svc-x"));
    }

    #[test]
    fn low_score_gets_review_without_monitoring() {
        let recs = recommendations(60.0, 10, 0, 0, 0, &[]);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].starts_with("Immediate compliance review"));

        let boundary = recommendations(80.0, 10, 0, 0, 0, &[]);
        assert_eq!(boundary.len(), 1);
        assert!(boundary[0].starts_with("Implement additional audit monitoring"));

        assert!(recommendations(90.0, 10, 0, 0, 0, &[]).is_empty());
    }

    #[test]
    fn service_health_tracks_failures_and_registry_status() {
        let now = Utc::now();
        let mut unhealthy = ServiceRegistration::new("billing", "http://billing");
        unhealthy.status = ServiceStatus::Unhealthy;
        let idle = ServiceRegistration::new("idle", "http://idle");

        let entries = vec![
            AuditEntry::new(EventType::ApiAccess, "billing", "a").with_timestamp(at(now, 1)),
            AuditEntry::new(EventType::ApiAccess, "billing", "b")
                .with_timestamp(at(now, 1))
                .with_failure("timeout"),
            AuditEntry::new(EventType::ApiAccess, "billing", "c")
                .with_timestamp(at(now, 1))
                .with_severity(LogLevel::Error),
            AuditEntry::new(EventType::ApiAccess, "billing", "d").with_timestamp(at(now, 1)),
            AuditEntry::new(EventType::ApiAccess, "unregistered", "e").with_timestamp(at(now, 1)),
        ];

        let report = build_report(&entries, &[unhealthy, idle], ReportWindow::Hourly, now);
        let names: Vec<&str> = report
            .service_health
            .iter()
            .map(|s| s.service_name.as_str())
            .collect();
        assert_eq!(names, vec!["billing", "idle", "unregistered"]);

        let billing = &report.service_health[0];
        assert_eq!(billing.status, Some(ServiceStatus::Unhealthy));
        assert_eq!(billing.event_count, 4);
        assert_eq!(billing.failure_count, 2);
        assert!((billing.error_rate - 0.5).abs() < 1e-9);

        assert_eq!(report.service_health[1].event_count, 0);
        assert_eq!(report.service_health[1].error_rate, 0.0);
        assert_eq!(report.service_health[2].status, None);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("billing")));
    }

    #[test]
    fn monthly_window_uses_calendar_months() {
        let now = DateTime::parse_from_rfc3339("2026-03-31T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = ReportWindow::Monthly.period_start(now);
        assert_eq!(start.to_rfc3339(), "2026-02-28T12:00:00+00:00");
        assert_eq!(
            ReportWindow::Weekly.period_start(now),
            now - Duration::days(7)
        );
    }

    #[test]
    fn window_parses_case_insensitively() {
        assert_eq!("Daily".parse::<ReportWindow>().unwrap(), ReportWindow::Daily);
        assert!("yearly".parse::<ReportWindow>().is_err());
    }

    #[test]
    fn engine_reads_store_and_registry() {
        let store = Arc::new(MemoryAuditStore::new(100));
        let registry = Arc::new(ServiceRegistry::new(store.clone(), "audit-service"));
        registry
            .register(ServiceRegistration::new("svc-x", "http://svc-x"))
            .unwrap();
        for e in scenario_b(Utc::now()) {
            store.append(e).unwrap();
        }

        let engine = AggregationEngine::new(store.clone(), registry);
        let report = engine.generate_report(ReportWindow::Hourly).unwrap();
        // three ingested entries plus the registration audit trail
        assert_eq!(report.total_events, 4);
        assert_eq!(report.events_by_service["audit-service"], 1);
        assert!(report
            .service_health
            .iter()
            .any(|s| s.service_name == "svc-x" && s.status == Some(ServiceStatus::Active)));
    }

    #[test]
    fn history_evicts_oldest_and_returns_tail() {
        let history = ReportHistory::new(3);
        let now = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let report = build_report(&[], &[], ReportWindow::Hourly, now);
            ids.push(report.report_id.clone());
            history.push(report).unwrap();
        }
        assert_eq!(history.len().unwrap(), 3);

        let tail = history.recent(2).unwrap();
        let tail_ids: Vec<&str> = tail.iter().map(|r| r.report_id.as_str()).collect();
        assert_eq!(tail_ids, vec![ids[3].as_str(), ids[4].as_str()]);
        assert_eq!(history.recent(50).unwrap().len(), 3);
    }
}
