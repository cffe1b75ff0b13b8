//! Periodic flush scheduling.
//!
//! Ticks come from a fixed interval or a cron expression. A mutex around
//! each pass keeps two flushes from running at once inside this process.
//! Shutdown takes the same mutex, so an in-flight pass always finishes and a
//! record is never cut off between Processing and Complete.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::config::FlushSchedule;
use crate::error::{ConfigError, Result};
use crate::sms::SmsGateway;
use crate::spool::{FlushReport, Spool};
use crate::transport::Transport;

/// Runs flush passes against one spool with a fixed transport and gateway.
pub struct FlushScheduler {
    spool: Arc<Spool>,
    transport: Arc<dyn Transport>,
    sms_gateway: Option<Arc<dyn SmsGateway>>,
    pass_lock: Mutex<()>,
    closed: AtomicBool,
}

impl FlushScheduler {
    pub fn new(
        spool: Arc<Spool>,
        transport: Arc<dyn Transport>,
        sms_gateway: Option<Arc<dyn SmsGateway>>,
    ) -> Self {
        Self {
            spool,
            transport,
            sms_gateway,
            pass_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Flush with the spool's limits.
    ///
    /// Returns `Ok(None)` without touching the store when a pass is already
    /// running or the scheduler has been shut down.
    pub async fn flush_now(&self) -> Result<Option<FlushReport>> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            debug!("Flush already in progress, skipping tick");
            return Ok(None);
        };
        if self.closed.load(Ordering::SeqCst) {
            debug!("Scheduler shut down, skipping flush");
            return Ok(None);
        }

        let report = self
            .spool
            .flush_queue(self.transport.as_ref(), self.sms_gateway.as_deref())
            .await?;
        Ok(Some(report))
    }

    /// Stop the ticker once the in-flight pass, if any, has finished.
    ///
    /// No pass starts after this returns.
    pub async fn shutdown(&self, ticker: tokio::task::JoinHandle<()>) {
        let _guard = self.pass_lock.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        ticker.abort();
        // Cancelled is the expected outcome.
        let _ = ticker.await;
        info!("Flush scheduler stopped");
    }

    /// One scheduled tick. Errors are logged; the next tick retries.
    async fn tick(&self) {
        match self.flush_now().await {
            Ok(Some(report)) if report.count() > 0 => {
                debug!(count = report.count(), "Scheduled flush delivered messages");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Scheduled flush failed"),
        }
    }
}

/// Parse a cron expression and compute the next fire time after `after`.
pub fn next_cron_fire(schedule: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let cron_schedule = cron::Schedule::from_str(schedule).map_err(|e| ConfigError::InvalidValue {
        key: "MAIL_SPOOL_FLUSH_CRON".into(),
        message: e.to_string(),
    })?;
    Ok(cron_schedule.after(&after).next())
}

/// Spawn the flush ticker background task.
///
/// A cron expression is validated before the task starts.
pub fn spawn_flush_ticker(
    scheduler: Arc<FlushScheduler>,
    schedule: FlushSchedule,
) -> Result<tokio::task::JoinHandle<()>> {
    let handle = match schedule {
        FlushSchedule::Interval(period) => {
            info!(interval_secs = period.as_secs(), "Flush ticker started");
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    // The first tick completes immediately: flush on startup.
                    ticker.tick().await;
                    scheduler.tick().await;
                }
            })
        }
        FlushSchedule::Cron(expr) => {
            next_cron_fire(&expr, Utc::now())?;
            info!(cron = %expr, "Flush ticker started");
            tokio::spawn(async move {
                loop {
                    let next = match next_cron_fire(&expr, Utc::now()) {
                        Ok(Some(next)) => next,
                        Ok(None) => {
                            info!(cron = %expr, "Cron schedule exhausted, stopping ticker");
                            return;
                        }
                        Err(e) => {
                            error!(error = %e, "Invalid cron schedule, stopping ticker");
                            return;
                        }
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(wait).await;
                    scheduler.tick().await;
                }
            })
        }
    };
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::error::{Error, TransportError};
    use crate::spool::ComposedMessage;
    use crate::store::LibSqlStore;
    use crate::transport::SendReport;

    struct SlowTransport {
        sends: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        fn name(&self) -> &str {
            "slow"
        }
        fn is_started(&self) -> bool {
            true
        }
        async fn start(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn stop(&self) -> std::result::Result<(), TransportError> {
            Ok(())
        }
        async fn send(
            &self,
            message: &ComposedMessage,
        ) -> std::result::Result<SendReport, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(SendReport {
                accepted: message.to.len(),
                failed_recipients: Vec::new(),
            })
        }
    }

    async fn scheduler(delay: Duration) -> (Arc<FlushScheduler>, Arc<SlowTransport>) {
        let spool = Arc::new(Spool::new(Arc::new(LibSqlStore::new_memory().await.unwrap())));
        spool
            .enqueue_message(&ComposedMessage::new("a@x.com", "b@x.com", "Hi", "Body"))
            .await
            .unwrap();
        let transport = Arc::new(SlowTransport {
            sends: AtomicUsize::new(0),
            delay,
        });
        let scheduler = Arc::new(FlushScheduler::new(
            spool,
            Arc::clone(&transport) as Arc<dyn Transport>,
            None,
        ));
        (scheduler, transport)
    }

    #[tokio::test]
    async fn flush_now_delivers_ready_records() {
        let (scheduler, transport) = scheduler(Duration::ZERO).await;
        let report = scheduler.flush_now().await.unwrap().unwrap();
        assert_eq!(report.count(), 1);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);

        let again = scheduler.flush_now().await.unwrap().unwrap();
        assert_eq!(again.count(), 0);
    }

    #[tokio::test]
    async fn overlapping_flush_is_skipped() {
        let (scheduler, transport) = scheduler(Duration::from_millis(200)).await;

        let first = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.flush_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = scheduler.flush_now().await.unwrap();

        assert!(second.is_none());
        let first = first.await.unwrap().unwrap().unwrap();
        assert_eq!(first.count(), 1);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn next_cron_fire_valid() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 30).unwrap();
        let next = next_cron_fire("0 * * * * *", after).unwrap().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn next_cron_fire_invalid() {
        let err = next_cron_fire("not a cron", Utc::now()).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn invalid_cron_is_rejected_before_spawn() {
        let (scheduler, _) = scheduler(Duration::ZERO).await;
        let result = spawn_flush_ticker(scheduler, FlushSchedule::Cron("nope".into()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_pass() {
        let (scheduler, transport) = scheduler(Duration::from_millis(500)).await;
        let handle = spawn_flush_ticker(
            Arc::clone(&scheduler),
            FlushSchedule::Interval(Duration::from_secs(3600)),
        )
        .unwrap();

        // Let the startup pass mark the record Processing and block in send.
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.shutdown(handle).await;

        let counts = scheduler.spool.status_counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert_eq!(counts.complete, 1);
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_after_shutdown_is_refused() {
        let (scheduler, transport) = scheduler(Duration::ZERO).await;
        let handle = tokio::spawn(async {});
        scheduler.shutdown(handle).await;

        assert!(scheduler.flush_now().await.unwrap().is_none());
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.spool.status_counts().await.unwrap().ready, 1);
    }

    #[tokio::test]
    async fn interval_ticker_flushes_on_startup() {
        let (scheduler, transport) = scheduler(Duration::ZERO).await;
        let handle =
            spawn_flush_ticker(scheduler, FlushSchedule::Interval(Duration::from_secs(3600)))
                .unwrap();

        for _ in 0..50 {
            if transport.sends.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
    }
}
