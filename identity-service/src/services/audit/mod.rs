//! Buffered, append-only audit trail.
//!
//! `log` appends to an in-memory buffer and returns immediately; a background
//! flusher drains it when the threshold is reached or on a timer. Critical
//! events are flushed synchronously; the flush that writes one opens its
//! security alert, even when that happens after an outage. Failed batches
//! go back to the front of the buffer, which is capped; overflow drops the
//! oldest events and raises an out-of-band alert.

pub mod alert;
pub mod compliance;
pub mod redaction;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use service_core::error::AppError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use self::alert::{AlertSink, OutOfBandAlert};
use super::store::AuditStore;
use super::{metrics, ServiceError};
use crate::config::AuditConfig;
use crate::models::{
    AuditCategory, AuditEvent, AuditEventType, AuditFilter, AuditReport, ReportSummary,
    RiskLevel, SecurityAlert,
};

/// Upper bound on events gathered into one compliance report.
const REPORT_EVENT_CAP: usize = 10_000;

/// Who and where an event came from.
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub correlation_id: Option<String>,
}

/// An event before redaction, tagging and buffering.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub category: AuditCategory,
    pub risk: RiskLevel,
    pub action: String,
    pub resource: Option<String>,
    pub details: Value,
    pub context: AuditContext,
}

impl AuditRecord {
    pub fn new(
        event_type: AuditEventType,
        category: AuditCategory,
        risk: RiskLevel,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            category,
            risk,
            action: action.into(),
            resource: None,
            details: json!({}),
            context: AuditContext::default(),
        }
    }

    pub fn context(mut self, context: &AuditContext) -> Self {
        self.context = context.clone();
        self
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.context.user_id = Some(user_id);
        self
    }

    pub fn tenant(mut self, tenant_id: Uuid) -> Self {
        self.context.tenant_id = Some(tenant_id);
        self
    }

    pub fn session(mut self, session_id: Uuid) -> Self {
        self.context.session_id = Some(session_id);
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    fn into_event(self) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4(),
            event_type: self.event_type.as_str().to_string(),
            category_code: self.category.as_str().to_string(),
            risk_code: self.risk.as_str().to_string(),
            user_id: self.context.user_id,
            tenant_id: self.context.tenant_id,
            session_id: self.context.session_id,
            ip_address: self.context.ip_address,
            user_agent: self.context.user_agent,
            resource: self.resource,
            action: self.action,
            details: redaction::redact(&self.details),
            compliance_tags: compliance::compliance_tags(self.category, self.risk, self.event_type),
            correlation_id: self.context.correlation_id,
            occurred_utc: Utc::now(),
        }
    }
}

/// GDPR data-subject request kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyRequestKind {
    Access,
    Export,
    Rectification,
    Erasure,
}

impl PrivacyRequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyRequestKind::Access => "access",
            PrivacyRequestKind::Export => "export",
            PrivacyRequestKind::Rectification => "rectification",
            PrivacyRequestKind::Erasure => "erasure",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub deleted: u64,
    pub failed_categories: Vec<String>,
}

struct Inner {
    store: Arc<dyn AuditStore>,
    alerts: Arc<dyn AlertSink>,
    config: AuditConfig,
    buffer: Mutex<VecDeque<AuditEvent>>,
    flush_lock: tokio::sync::Mutex<()>,
    wake: Notify,
    overflowing: AtomicBool,
    dropped: AtomicU64,
}

#[derive(Clone)]
pub struct AuditLogger {
    inner: Arc<Inner>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>, alerts: Arc<dyn AlertSink>, config: AuditConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                alerts,
                config,
                buffer: Mutex::new(VecDeque::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
                overflowing: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Records an event and returns its id. Only critical events wait for storage.
    pub async fn log(&self, record: AuditRecord) -> Uuid {
        let risk = record.risk;
        let event = record.into_event();
        let event_id = event.event_id;

        tracing::info!(
            target: "audit",
            event_id = %event_id,
            event_type = %event.event_type,
            category = %event.category_code,
            risk = %event.risk_code,
            user_id = ?event.user_id,
            tenant_id = ?event.tenant_id,
            "Audit event recorded"
        );
        metrics::record_audit_event(&event.category_code, &event.risk_code);

        if risk == RiskLevel::Critical {
            let event_type = event.event_type.clone();
            self.enqueue(event);

            // The flush that makes the event durable opens its alert, whether
            // it is this one or a later one after an outage.
            if let Err(e) = self.flush().await {
                self.raise(
                    "critical_event_unflushed",
                    format!("Critical event {} ({}) not yet durable: {}", event_id, event_type, e),
                );
            }
            return event_id;
        }

        let buffered = self.enqueue(event);
        if buffered >= self.inner.config.flush_threshold {
            self.inner.wake.notify_one();
        }
        event_id
    }

    /// Convenience for GDPR data-subject requests.
    pub async fn log_privacy_request(
        &self,
        context: &AuditContext,
        kind: PrivacyRequestKind,
        subject_user_id: Uuid,
    ) -> Uuid {
        self.log(
            AuditRecord::new(
                AuditEventType::PrivacyRequest,
                AuditCategory::Privacy,
                RiskLevel::Medium,
                format!("privacy_{}", kind.as_str()),
            )
            .context(context)
            .resource("users")
            .details(json!({ "kind": kind.as_str(), "subject_user_id": subject_user_id })),
        )
        .await
    }

    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    /// Appends to the buffer, evicting the oldest events beyond the cap.
    fn enqueue(&self, event: AuditEvent) -> usize {
        let (len, evicted) = match self.inner.buffer.lock() {
            Ok(mut buffer) => {
                buffer.push_back(event);
                let mut evicted = 0;
                while buffer.len() > self.inner.config.max_buffered_events {
                    buffer.pop_front();
                    evicted += 1;
                }
                (buffer.len(), evicted)
            }
            Err(e) => {
                self.raise(
                    "audit_buffer_poisoned",
                    format!("Audit buffer unavailable, event {} lost: {}", event.event_id, e),
                );
                return 0;
            }
        };
        self.note_evictions(evicted);
        len
    }

    fn note_evictions(&self, evicted: usize) {
        if evicted == 0 {
            return;
        }
        self.inner
            .dropped
            .fetch_add(evicted as u64, Ordering::SeqCst);
        // One alert per overflow episode; the flag clears on the next successful flush.
        if !self.inner.overflowing.swap(true, Ordering::SeqCst) {
            self.raise(
                "audit_buffer_overflow",
                format!(
                    "Audit buffer exceeded {} events; oldest events are being dropped",
                    self.inner.config.max_buffered_events
                ),
            );
        }
    }

    fn raise(&self, alert_type: &'static str, message: String) {
        self.inner.alerts.raise(OutOfBandAlert {
            alert_type,
            risk: RiskLevel::Critical,
            message,
        });
    }

    /// Writes everything buffered. On failure the batch is put back in front of
    /// newer events, within the cap.
    pub async fn flush(&self) -> Result<usize, AppError> {
        let _guard = self.inner.flush_lock.lock().await;

        let batch: Vec<AuditEvent> = match self.inner.buffer.lock() {
            Ok(mut buffer) => buffer.drain(..).collect(),
            Err(e) => {
                return Err(AppError::InternalError(anyhow::anyhow!(
                    "Audit buffer poisoned: {}",
                    e
                )))
            }
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.inner.store.insert_events(&batch).await {
            Ok(()) => {
                self.inner.overflowing.store(false, Ordering::SeqCst);
                tracing::debug!(count = batch.len(), "Flushed audit events");
                self.open_alerts_for(&batch).await;
                Ok(batch.len())
            }
            Err(e) => {
                tracing::warn!(count = batch.len(), error = %e, "Audit flush failed, requeueing");
                let evicted = match self.inner.buffer.lock() {
                    Ok(mut buffer) => {
                        for event in batch.into_iter().rev() {
                            buffer.push_front(event);
                        }
                        let mut evicted = 0;
                        while buffer.len() > self.inner.config.max_buffered_events {
                            buffer.pop_front();
                            evicted += 1;
                        }
                        evicted
                    }
                    Err(_) => 0,
                };
                self.note_evictions(evicted);
                Err(e)
            }
        }
    }

    /// One security alert per critical event in a batch that was just written.
    async fn open_alerts_for(&self, batch: &[AuditEvent]) {
        let critical = RiskLevel::Critical.as_str();
        for event in batch.iter().filter(|e| e.risk_code == critical) {
            let alert = SecurityAlert::new(
                event.event_id,
                event.tenant_id,
                &event.event_type,
                critical,
                format!("{}: {}", event.event_type, event.action),
            );
            if let Err(e) = self.inner.store.insert_alert(&alert).await {
                self.raise(
                    "security_alert_unrecorded",
                    format!("Critical event {} could not open an alert: {}", event.event_id, e),
                );
            }
        }
    }

    /// Runs the periodic flusher until `cancel` fires, then flushes once more.
    pub fn spawn_flusher(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let logger = self.clone();
        let interval = Duration::from_millis(self.inner.config.flush_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                    _ = logger.inner.wake.notified() => {}
                }
                if let Err(e) = logger.flush().await {
                    tracing::error!(error = %e, buffered = logger.buffered(), "Periodic audit flush failed");
                }
            }
            logger.shutdown().await;
        })
    }

    /// Runs the retention purge on its interval until `cancel` fires.
    pub fn spawn_purger(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let logger = self.clone();
        let interval = Duration::from_secs(self.inner.config.purge_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let summary = logger.purge_expired(Utc::now()).await;
                tracing::info!(
                    deleted = summary.deleted,
                    failed = ?summary.failed_categories,
                    "Audit retention purge completed"
                );
            }
        })
    }

    /// Final flush; raises an out-of-band alert if events remain unwritten.
    pub async fn shutdown(&self) {
        if let Err(e) = self.flush().await {
            self.raise(
                "audit_shutdown_loss",
                format!(
                    "{} audit events could not be written at shutdown: {}",
                    self.buffered(),
                    e
                ),
            );
        }
    }

    /// Deletes events past their category's retention window as of `now`.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> PurgeSummary {
        let mut summary = PurgeSummary::default();
        for category in AuditCategory::ALL {
            let cutoff = compliance::retention_cutoff(category, now);
            match self.inner.store.purge_events(category, cutoff).await {
                Ok(deleted) => summary.deleted += deleted,
                Err(e) => {
                    tracing::error!(category = category.as_str(), error = %e, "Audit purge failed");
                    summary.failed_categories.push(category.as_str().to_string());
                }
            }
        }
        summary
    }

    /// Filtered search. Buffered events are flushed first so callers read their own writes.
    pub async fn search(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, ServiceError> {
        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "Searching audit trail with unflushed events");
        }
        Ok(self.inner.store.search_events(filter).await?)
    }

    /// Aggregates every event in `[from, to]` for a tenant (or all tenants).
    pub async fn report(
        &self,
        tenant_id: Option<Uuid>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AuditReport, ServiceError> {
        if from > to {
            return Err(ServiceError::validation("Report start must precede its end"));
        }

        let mut events = Vec::new();
        let mut filter = AuditFilter {
            tenant_id,
            from: Some(from),
            to: Some(to),
            limit: Some(AuditFilter::MAX_LIMIT),
            offset: Some(0),
            ..Default::default()
        };

        loop {
            let page = self.search(&filter).await?;
            let page_len = page.len() as i64;
            events.extend(page);
            if page_len < AuditFilter::MAX_LIMIT || events.len() >= REPORT_EVENT_CAP {
                break;
            }
            filter.offset = Some(filter.effective_offset() + page_len);
        }
        events.truncate(REPORT_EVENT_CAP);

        Ok(AuditReport {
            tenant_id,
            from,
            to,
            generated_utc: Utc::now(),
            summary: summarize(&events),
            events,
        })
    }

    pub async fn resolve_alert(
        &self,
        alert_id: Uuid,
        context: &AuditContext,
        resolved_by: Uuid,
    ) -> Result<(), ServiceError> {
        let resolved = self
            .inner
            .store
            .resolve_alert(alert_id, context.tenant_id, resolved_by, Utc::now())
            .await?;
        if !resolved {
            return Err(ServiceError::NotFound("Open alert not found".to_string()));
        }

        self.log(
            AuditRecord::new(
                AuditEventType::AlertResolved,
                AuditCategory::Security,
                RiskLevel::Low,
                "resolve_alert",
            )
            .context(context)
            .resource("audit")
            .details(json!({ "alert_id": alert_id })),
        )
        .await;
        Ok(())
    }
}

pub fn summarize(events: &[AuditEvent]) -> ReportSummary {
    let mut summary = ReportSummary {
        total: events.len(),
        ..Default::default()
    };
    for event in events {
        let risk = event.risk();
        if risk == Some(RiskLevel::Critical) {
            summary.critical += 1;
        }
        if risk >= Some(RiskLevel::High) {
            summary.high_risk += 1;
        }
        if event.has_tag(compliance::TAG_FAILED_AUTH) {
            summary.failed_logins += 1;
        }
        match event.category() {
            Some(AuditCategory::DataAccess) => summary.data_access += 1,
            Some(AuditCategory::Configuration) => summary.config_changes += 1,
            _ => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::alert::RecordingAlertSink;
    use super::*;
    use crate::services::memory::MemoryStore;

    fn config(threshold: usize, cap: usize) -> AuditConfig {
        AuditConfig {
            flush_threshold: threshold,
            flush_interval_ms: 60_000,
            max_buffered_events: cap,
            purge_interval_seconds: 86_400,
        }
    }

    fn record(risk: RiskLevel) -> AuditRecord {
        AuditRecord::new(
            AuditEventType::PermissionDenied,
            AuditCategory::Authorization,
            risk,
            "check_permission",
        )
    }

    #[tokio::test]
    async fn events_stay_buffered_until_flushed() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone(), Arc::new(RecordingAlertSink::new()), config(100, 1000));

        logger.log(record(RiskLevel::Medium)).await;
        assert_eq!(logger.buffered(), 1);
        assert_eq!(store.event_count().unwrap(), 0);

        assert_eq!(logger.flush().await.unwrap(), 1);
        assert_eq!(logger.buffered(), 0);
        assert_eq!(store.event_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn critical_events_flush_immediately_and_open_alert() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone(), Arc::new(RecordingAlertSink::new()), config(100, 1000));

        logger.log(record(RiskLevel::Low)).await;
        let id = logger.log(record(RiskLevel::Critical)).await;

        assert_eq!(logger.buffered(), 0);
        assert_eq!(store.event_count().unwrap(), 2);
        let alerts = store.open_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event_id, id);
    }

    #[tokio::test]
    async fn failed_flush_requeues_in_order() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(store.clone(), Arc::new(RecordingAlertSink::new()), config(100, 1000));

        let first = logger.log(record(RiskLevel::Low)).await;
        store.set_available(false);
        assert!(logger.flush().await.is_err());
        let second = logger.log(record(RiskLevel::Low)).await;
        assert_eq!(logger.buffered(), 2);

        store.set_available(true);
        assert_eq!(logger.flush().await.unwrap(), 2);
        let stored = store.search_events(&AuditFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = stored.iter().map(|e| e.event_id).collect();
        assert!(ids.contains(&first) && ids.contains(&second));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_alerts_out_of_band() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingAlertSink::new());
        let logger = AuditLogger::new(store.clone(), sink.clone(), config(100, 3));

        store.set_available(false);
        for _ in 0..5 {
            logger.log(record(RiskLevel::Low)).await;
        }

        assert_eq!(logger.buffered(), 3);
        assert_eq!(logger.dropped(), 2);
        let overflow_alerts: Vec<_> = sink
            .alerts()
            .into_iter()
            .filter(|a| a.alert_type == "audit_buffer_overflow")
            .collect();
        assert_eq!(overflow_alerts.len(), 1);
    }

    #[tokio::test]
    async fn critical_event_during_outage_alerts_out_of_band() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingAlertSink::new());
        let logger = AuditLogger::new(store.clone(), sink.clone(), config(100, 1000));

        store.set_available(false);
        let id = logger.log(record(RiskLevel::Critical)).await;

        assert_eq!(logger.buffered(), 1);
        assert!(sink
            .alerts()
            .iter()
            .any(|a| a.alert_type == "critical_event_unflushed"));

        store.set_available(true);
        assert_eq!(logger.flush().await.unwrap(), 1);
        let alerts = store.open_alerts().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].event_id, id);

        // Later flushes do not open it again.
        logger.log(record(RiskLevel::Low)).await;
        logger.flush().await.unwrap();
        assert_eq!(store.open_alerts().unwrap().len(), 1);
    }

    #[test]
    fn summary_counts_each_dimension() {
        let mut events = Vec::new();
        for (event_type, category, risk) in [
            (AuditEventType::LoginFailed, AuditCategory::Authentication, RiskLevel::High),
            (AuditEventType::TokenReuseDetected, AuditCategory::Security, RiskLevel::Critical),
            (AuditEventType::AuditTrailViewed, AuditCategory::DataAccess, RiskLevel::Low),
            (AuditEventType::PermissionGranted, AuditCategory::Authorization, RiskLevel::Low),
        ] {
            events.push(AuditRecord::new(event_type, category, risk, "x").into_event());
        }

        let summary = summarize(&events);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high_risk, 2);
        assert_eq!(summary.failed_logins, 2);
        assert_eq!(summary.data_access, 1);
        assert_eq!(summary.config_changes, 0);
    }
}
