//! Sitepulse audit monitor runtime.
//!
//! Watches one backend audit to completion and renders a terminal progress
//! bar while it runs. Configuration comes from the environment; pass
//! `SITEPULSE_SIMULATE=true` to run against the in-memory backend without a
//! server.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use sitepulse_application::{AuditGateway, AuditMonitor, MonitorConfig, ProgressSink, WatchRequest};
use sitepulse_core::{AppError, AppResult, AuditId};
use sitepulse_domain::AuditCategory;
use sitepulse_infrastructure::{HttpAuditGateway, InMemoryAuditGateway};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct MonitorAppConfig {
    api_base_url: String,
    api_token: Option<String>,
    audit_id: String,
    target_url: String,
    categories: Vec<AuditCategory>,
    expected_seconds: Option<u64>,
    simulate: bool,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = MonitorAppConfig::load()?;
    let audit_id = AuditId::new(config.audit_id.as_str())?;

    let gateway: Arc<dyn AuditGateway> = if config.simulate {
        info!(audit_id = %audit_id, "running against the simulated backend");
        Arc::new(InMemoryAuditGateway::new(
            audit_id.clone(),
            config.target_url.clone(),
            config.categories.clone(),
        ))
    } else {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
        Arc::new(HttpAuditGateway::new(
            http_client,
            config.api_base_url.as_str(),
            config.api_token.clone(),
        )?)
    };

    let sink = Arc::new(ProgressBarSink::new());
    let monitor = AuditMonitor::new(
        gateway,
        Arc::clone(&sink) as Arc<dyn ProgressSink>,
        MonitorConfig::default(),
    )?;

    let mut request = WatchRequest::new(audit_id.clone(), config.categories.clone());
    request.expected_duration = config.expected_seconds.map(Duration::from_secs);

    info!(
        audit_id = %audit_id,
        api_base_url = %config.api_base_url,
        categories = config.categories.len(),
        "sitepulse-monitor started"
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    match monitor.watch(request, cancel_rx).await {
        Ok(report) => {
            sink.finish();
            for (category, score) in report.scores().iter() {
                info!(
                    category = category.as_str(),
                    score,
                    "audit category scored"
                );
            }
            if let Some(overall) = report.scores().overall() {
                info!(
                    audit_id = %audit_id,
                    target_url = report.target_url(),
                    overall,
                    "audit completed"
                );
            }
            Ok(())
        }
        Err(AppError::Cancelled(reason)) => {
            sink.abandon();
            info!(audit_id = %audit_id, reason = %reason, "monitoring cancelled");
            Ok(())
        }
        Err(error) => {
            sink.abandon();
            warn!(audit_id = %audit_id, error = %error, "audit watch failed");
            Err(error)
        }
    }
}

/// Terminal progress bar fed by the monitor's frame loop.
struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        bar.set_message("auditing");
        Self { bar }
    }

    fn finish(&self) {
        self.bar.set_position(100);
        self.bar.finish_with_message("done");
    }

    fn abandon(&self) {
        self.bar.abandon();
    }
}

#[async_trait]
impl ProgressSink for ProgressBarSink {
    async fn publish(&self, displayed: f64) {
        self.bar.set_position(displayed.round() as u64);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

impl MonitorAppConfig {
    fn load() -> AppResult<Self> {
        let audit_id = required_env("SITEPULSE_AUDIT_ID")?;
        let api_base_url = env::var("SITEPULSE_API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:4000".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let api_token = env::var("SITEPULSE_API_TOKEN")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());
        let target_url = env::var("SITEPULSE_TARGET_URL")
            .unwrap_or_else(|_| "https://example.com".to_owned());
        let categories = parse_categories_env("SITEPULSE_CATEGORIES")?;
        let expected_seconds = parse_env_opt_u64("SITEPULSE_EXPECTED_SECONDS")?;
        let simulate = parse_env_bool("SITEPULSE_SIMULATE", false)?;

        if let Some(seconds) = expected_seconds
            && seconds == 0
        {
            return Err(AppError::Validation(
                "SITEPULSE_EXPECTED_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            api_base_url,
            api_token,
            audit_id,
            target_url,
            categories,
            expected_seconds,
            simulate,
        })
    }
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_categories_env(name: &str) -> AppResult<Vec<AuditCategory>> {
    match env::var(name) {
        Ok(value) => value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(AuditCategory::parse)
            .collect(),
        Err(_) => Ok(Vec::new()),
    }
}

fn parse_env_opt_u64(name: &str) -> AppResult<Option<u64>> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map(Some).map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(AppError::Validation(format!(
                "invalid {name} value '{other}': expected a boolean"
            ))),
        },
        Err(_) => Ok(default),
    }
}
