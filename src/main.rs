use std::sync::Arc;

use anyhow::Context;

use mail_spool::config::{FlushSchedule, SpoolConfig};
use mail_spool::scheduler::{self, FlushScheduler};
use mail_spool::sms::{HttpSmsGateway, SmsGateway, SmsGatewayConfig};
use mail_spool::spool::Spool;
use mail_spool::store::{LibSqlStore, RecordStore};
use mail_spool::transport::{SmtpConfig, SmtpTransport, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = SpoolConfig::from_env().context("Invalid spool configuration")?;

    eprintln!("📮 Mail Spool v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlStore::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let spool = Arc::new(Spool::new(Arc::clone(&store)).with_limits(config.limits));
    let counts = spool.status_counts().await?;
    eprintln!(
        "   Queue: {} ready, {} processing, {} complete",
        counts.ready, counts.processing, counts.complete
    );
    if counts.processing > 0 {
        tracing::warn!(
            count = counts.processing,
            "Records left Processing by an interrupted flush, they will not be retried"
        );
    }

    // ── Transport ────────────────────────────────────────────────────────
    let smtp_config = SmtpConfig::from_env()?.context("SMTP_HOST must be set")?;
    eprintln!("   SMTP: {}:{}", smtp_config.host, smtp_config.port);
    let transport: Arc<dyn Transport> = Arc::new(SmtpTransport::new(smtp_config));

    // ── SMS Gateway ──────────────────────────────────────────────────────
    let sms_gateway: Option<Arc<dyn SmsGateway>> = match SmsGatewayConfig::from_env()? {
        Some(gateway_config) => {
            eprintln!("   SMS: {}", gateway_config.base_url);
            let gateway: Arc<dyn SmsGateway> = Arc::new(HttpSmsGateway::new(gateway_config)?);
            Some(gateway)
        }
        None => {
            eprintln!("   SMS: disabled");
            None
        }
    };

    let limits = config.limits;
    eprintln!(
        "   Limits: {} messages, {}s",
        if limits.message_limit == 0 {
            "unlimited".to_string()
        } else {
            limits.message_limit.to_string()
        },
        limits.time_limit.as_secs()
    );

    let flusher = Arc::new(FlushScheduler::new(
        spool,
        Arc::clone(&transport),
        sms_gateway,
    ));

    if config.run_once {
        let report = flusher
            .flush_now()
            .await
            .context("Flush failed")?
            .unwrap_or_default();
        eprintln!(
            "   Flushed: {} sent, {} failed recipients, {} skipped",
            report.count(),
            report.failed_recipients.len(),
            report.skipped.len()
        );
        transport.stop().await?;
        return Ok(());
    }

    match &config.schedule {
        FlushSchedule::Interval(period) => eprintln!("   Schedule: every {}s\n", period.as_secs()),
        FlushSchedule::Cron(expr) => eprintln!("   Schedule: cron '{}'\n", expr),
    }
    let ticker = scheduler::spawn_flush_ticker(Arc::clone(&flusher), config.schedule.clone())?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for the current flush");
    flusher.shutdown(ticker).await;
    transport.stop().await?;

    Ok(())
}
