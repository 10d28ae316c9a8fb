//! Run orchestration: load seen links, fetch every source, dedupe, render, notify, persist.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use rfjd_adapters::{default_adapters, SourceAdapter};
use rfjd_core::{Job, SeenSet};
use rfjd_digest::{render_digest, DigestError};
use rfjd_notify::{Delivery, EmailNotifier, MailConfig, Notifier, NotifyError, SMTP_HOST, SMTP_PORT};
use rfjd_storage::{HttpClientConfig, HttpFetcher, SeenStore, DEFAULT_SEEN_FILE, DEFAULT_USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "rfjd-sync";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub seen_file: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub mail: MailConfig,
}

impl RunConfig {
    /// Read the process environment, after loading `.env` when one exists.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            seen_file: lookup("SEEN_JOBS_FILE")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SEEN_FILE)),
            user_agent: lookup("RFJD_USER_AGENT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: lookup("RFJD_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            mail: MailConfig {
                smtp_host: SMTP_HOST.to_string(),
                smtp_port: SMTP_PORT,
                username: lookup("EMAIL_USER"),
                password: lookup("EMAIL_PASS"),
                dry_run: parse_dry_run(lookup("DRY_RUN").as_deref()),
                preview_to_stderr: false,
            },
        }
    }
}

/// Dry-run unless the flag explicitly says otherwise.
pub fn parse_dry_run(value: Option<&str>) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()) {
        Some(v) => !matches!(v.as_str(), "0" | "false" | "no" | "off"),
        None => true,
    }
}

/// Per-source result of one fetch attempt.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub source_id: String,
    pub result: Result<Vec<Job>, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub fetched: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AggregateOutcome {
    pub sources: Vec<SourceReport>,
    pub fetched_total: usize,
    pub skipped_duplicate: usize,
    pub skipped_seen: usize,
    pub new_jobs: Vec<Job>,
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("No jobs found from any source.")]
    NoJobsFound { sources: Vec<SourceReport> },
}

/// Invoke every adapter in order. A failing source contributes an error entry
/// and never stops the remaining ones.
pub async fn fetch_all(
    adapters: &[Box<dyn SourceAdapter>],
    http: &HttpFetcher,
) -> Vec<SourceBatch> {
    let mut batches = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        let source_id = adapter.source_id().to_string();
        let result = match adapter.collect(http).await {
            Ok(jobs) => {
                info!(source_id = %source_id, jobs = jobs.len(), "[OK] source fetched");
                Ok(jobs)
            }
            Err(err) => {
                warn!(source_id = %source_id, error = %err, "[FAIL] source fetch failed");
                Err(err.to_string())
            }
        };
        batches.push(SourceBatch { source_id, result });
    }
    batches
}

/// Merge batches in source order, keeping the first job per link and
/// dropping links already in `seen`.
pub fn merge(batches: &[SourceBatch], seen: &SeenSet) -> Result<AggregateOutcome, AggregateError> {
    let sources = batches
        .iter()
        .map(|batch| match &batch.result {
            Ok(jobs) => SourceReport {
                source_id: batch.source_id.clone(),
                fetched: jobs.len(),
                error: None,
            },
            Err(err) => SourceReport {
                source_id: batch.source_id.clone(),
                fetched: 0,
                error: Some(err.clone()),
            },
        })
        .collect::<Vec<_>>();

    let fetched_total = sources.iter().map(|s| s.fetched).sum::<usize>();
    if fetched_total == 0 {
        return Err(AggregateError::NoJobsFound { sources });
    }

    let mut links = HashSet::new();
    let mut new_jobs = Vec::new();
    let mut skipped_duplicate = 0usize;
    let mut skipped_seen = 0usize;
    for job in batches.iter().filter_map(|b| b.result.as_ref().ok()).flatten() {
        if seen.contains(job.link()) {
            skipped_seen += 1;
        } else if !links.insert(job.link()) {
            skipped_duplicate += 1;
        } else {
            new_jobs.push(job.clone());
        }
    }

    Ok(AggregateOutcome {
        sources,
        fetched_total,
        skipped_duplicate,
        skipped_seen,
        new_jobs,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub fetched_total: usize,
    pub skipped_duplicate: usize,
    pub skipped_seen: usize,
    pub jobs_sent: usize,
    pub delivery_mode: String,
    pub seen_total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    NothingNew {
        run_id: Uuid,
        fetched_total: usize,
        sources: Vec<SourceReport>,
    },
    Delivered(RunSummary),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Digest(#[from] DigestError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error("persisting seen-set: {0:#}")]
    Persist(anyhow::Error),
    #[error("initialising run: {0:#}")]
    Setup(anyhow::Error),
}

impl RunError {
    pub fn category(&self) -> &'static str {
        match self {
            RunError::Aggregate(_) => "aggregation",
            RunError::Digest(_) => "render",
            RunError::Notify(err) if err.is_configuration() => "configuration",
            RunError::Notify(_) => "transport",
            RunError::Persist(_) => "persistence",
            RunError::Setup(_) => "setup",
        }
    }
}

pub struct RunPipeline {
    store: SeenStore,
    http: HttpFetcher,
    adapters: Vec<Box<dyn SourceAdapter>>,
    notifier: Box<dyn Notifier>,
}

impl RunPipeline {
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
        })
        .map_err(RunError::Setup)?;
        Ok(Self {
            store: SeenStore::new(config.seen_file.clone()),
            http,
            adapters: default_adapters(),
            notifier: Box::new(EmailNotifier::new(config.mail)),
        })
    }

    pub fn with_adapters(mut self, adapters: Vec<Box<dyn SourceAdapter>>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// One complete run. The seen-set is written only after a successful send.
    pub async fn run_once(&self) -> Result<RunOutcome, RunError> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        let mut seen = self.store.load().await;
        info!(
            %run_id,
            seen = seen.len(),
            path = %self.store.path().display(),
            "loaded previously seen jobs"
        );

        let batches = fetch_all(&self.adapters, &self.http).await;
        let aggregate = merge(&batches, &seen)?;
        info!(
            %run_id,
            fetched = aggregate.fetched_total,
            new = aggregate.new_jobs.len(),
            duplicates = aggregate.skipped_duplicate,
            already_seen = aggregate.skipped_seen,
            "aggregated sources"
        );

        if aggregate.new_jobs.is_empty() {
            info!(%run_id, "no new jobs since last run");
            return Ok(RunOutcome::NothingNew {
                run_id,
                fetched_total: aggregate.fetched_total,
                sources: aggregate.sources,
            });
        }

        let digest = render_digest(&aggregate.new_jobs, Local::now().date_naive())?;
        let delivery = self.notifier.send(&digest).await?;
        if let Delivery::Sent { recipient } = &delivery {
            info!(%run_id, %recipient, jobs = digest.job_count, "digest sent");
        }

        seen.extend_from_jobs(&aggregate.new_jobs);
        self.store.save(&seen).await.map_err(RunError::Persist)?;
        info!(%run_id, seen = seen.len(), "saved seen jobs");

        Ok(RunOutcome::Delivered(RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            sources: aggregate.sources,
            fetched_total: aggregate.fetched_total,
            skipped_duplicate: aggregate.skipped_duplicate,
            skipped_seen: aggregate.skipped_seen,
            jobs_sent: digest.job_count,
            delivery_mode: delivery.mode().to_string(),
            seen_total: seen.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use rfjd_adapters::{AdapterError, Crawlability, FetchedPage};
    use rfjd_digest::Digest;
    use tempfile::tempdir;

    struct StaticAdapter {
        source_id: &'static str,
        jobs: Option<Vec<Job>>,
    }

    #[async_trait]
    impl SourceAdapter for StaticAdapter {
        fn source_id(&self) -> &'static str {
            self.source_id
        }

        fn display_name(&self) -> &'static str {
            self.source_id
        }

        fn crawlability(&self) -> Crawlability {
            Crawlability::Api
        }

        fn listing_url(&self) -> &'static str {
            "http://127.0.0.1:9/unused"
        }

        fn parse_listing(&self, _page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
            Ok(Vec::new())
        }

        async fn collect(&self, _http: &HttpFetcher) -> Result<Vec<Job>, AdapterError> {
            self.jobs
                .clone()
                .ok_or_else(|| AdapterError::Message(format!("{} unreachable", self.source_id)))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Digest>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, digest: &Digest) -> Result<Delivery, NotifyError> {
            self.sent.lock().expect("lock").push(digest.clone());
            Ok(Delivery::Sent {
                recipient: "me@example.com".to_string(),
            })
        }
    }

    fn job(source_id: &str, n: usize) -> Job {
        Job::new(
            source_id,
            format!("Company {n}"),
            format!("Frontend Developer {n}"),
            format!("https://{source_id}.example/jobs/{n}"),
            &["remote", "frontend"],
            &["React"],
        )
    }

    fn jobs(source_id: &str, range: std::ops::Range<usize>) -> Vec<Job> {
        range.map(|n| job(source_id, n)).collect()
    }

    fn adapter(source_id: &'static str, jobs: Option<Vec<Job>>) -> Box<dyn SourceAdapter> {
        Box::new(StaticAdapter { source_id, jobs })
    }

    fn batch(source_id: &str, jobs: Vec<Job>) -> SourceBatch {
        SourceBatch {
            source_id: source_id.to_string(),
            result: Ok(jobs),
        }
    }

    fn config(seen_file: PathBuf, dry_run: bool) -> RunConfig {
        RunConfig {
            seen_file,
            user_agent: "rfjd-test".to_string(),
            http_timeout_secs: 1,
            mail: MailConfig {
                dry_run,
                ..MailConfig::default()
            },
        }
    }

    #[test]
    fn dry_run_flag_defaults_to_dry() {
        assert!(parse_dry_run(None));
        assert!(parse_dry_run(Some("1")));
        assert!(parse_dry_run(Some("true")));
        assert!(parse_dry_run(Some("")));
        assert!(!parse_dry_run(Some("0")));
        assert!(!parse_dry_run(Some(" False ")));
        assert!(!parse_dry_run(Some("no")));
        assert!(!parse_dry_run(Some("OFF")));
    }

    #[test]
    fn config_reads_lookup_with_defaults() {
        let config = RunConfig::from_lookup(|key| match key {
            "EMAIL_USER" => Some("me@example.com".to_string()),
            "DRY_RUN" => Some("0".to_string()),
            "RFJD_HTTP_TIMEOUT_SECS" => Some("nope".to_string()),
            _ => None,
        });
        assert_eq!(config.seen_file, PathBuf::from(DEFAULT_SEEN_FILE));
        assert_eq!(config.http_timeout_secs, DEFAULT_HTTP_TIMEOUT_SECS);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(config.mail.username.as_deref(), Some("me@example.com"));
        assert_eq!(config.mail.password, None);
        assert!(!config.mail.dry_run);
        assert_eq!(config.mail.smtp_host, SMTP_HOST);
        assert_eq!(config.mail.smtp_port, SMTP_PORT);
    }

    #[test]
    fn duplicate_links_keep_first_source() {
        let link = "https://shared.example/1";
        let shared = Job::new("remotive", "Globex", "React Dev", link, &[], &[]);
        let copy = Job::new("remoteok", "Globex Inc", "React Developer", link, &[], &[]);
        let batches = vec![
            batch("remotive", vec![shared.clone(), job("remotive", 2)]),
            batch("remoteok", vec![copy, job("remoteok", 3)]),
        ];
        let outcome = merge(&batches, &SeenSet::new()).expect("merge");
        assert_eq!(outcome.fetched_total, 4);
        assert_eq!(outcome.skipped_duplicate, 1);
        assert_eq!(outcome.new_jobs.len(), 3);
        let kept = outcome
            .new_jobs
            .iter()
            .filter(|j| j.link() == "https://shared.example/1")
            .collect::<Vec<_>>();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].source_id(), "remotive");
        assert_eq!(kept[0].company(), "Globex");
    }

    #[test]
    fn previously_seen_links_are_excluded() {
        let seen: SeenSet = ["https://arbeitnow.example/jobs/1"].into_iter().collect();
        let batches = vec![batch("arbeitnow", jobs("arbeitnow", 0..3))];
        let outcome = merge(&batches, &seen).expect("merge");
        assert_eq!(outcome.skipped_seen, 1);
        assert!(outcome
            .new_jobs
            .iter()
            .all(|j| j.link() != "https://arbeitnow.example/jobs/1"));
        assert_eq!(outcome.new_jobs.len(), 2);
    }

    #[test]
    fn zero_jobs_across_sources_is_an_error() {
        let batches = vec![
            batch("arbeitnow", Vec::new()),
            SourceBatch {
                source_id: "remotive".to_string(),
                result: Err("timeout".to_string()),
            },
        ];
        let err = merge(&batches, &SeenSet::new()).expect_err("nothing fetched");
        let AggregateError::NoJobsFound { sources } = err;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].error.as_deref(), Some("timeout"));
    }

    #[test]
    fn all_seen_is_not_an_error() {
        let all = jobs("remotive", 0..2);
        let mut seen = SeenSet::new();
        seen.extend_from_jobs(&all);
        let outcome = merge(&[batch("remotive", all)], &seen).expect("merge");
        assert!(outcome.new_jobs.is_empty());
        assert_eq!(outcome.skipped_seen, 2);
    }

    #[tokio::test]
    async fn failing_source_does_not_stop_the_others() {
        let adapters = vec![
            adapter("first", Some(jobs("first", 0..2))),
            adapter("broken", None),
            adapter("third", Some(jobs("third", 0..3))),
        ];
        let http = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let batches = fetch_all(&adapters, &http).await;
        let ids = batches.iter().map(|b| b.source_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["first", "broken", "third"]);
        assert!(batches[1].result.is_err());
        assert_eq!(batches[2].result.as_ref().map(Vec::len), Ok(3));
    }

    #[tokio::test]
    async fn dry_run_sends_preview_and_persists_seen_links() {
        let dir = tempdir().expect("tempdir");
        let seen_file = dir.path().join("seen_jobs.json");
        let pipeline = RunPipeline::new(config(seen_file.clone(), true))
            .expect("pipeline")
            .with_adapters(vec![
                adapter("first", Some(jobs("first", 0..2))),
                adapter("broken", None),
                adapter("third", Some(jobs("third", 0..3))),
            ]);

        let outcome = pipeline.run_once().await.expect("run succeeds");
        let RunOutcome::Delivered(summary) = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(summary.fetched_total, 5);
        assert_eq!(summary.jobs_sent, 5);
        assert_eq!(summary.delivery_mode, "dry-run");
        assert_eq!(summary.sources[1].error.as_deref(), Some("broken unreachable"));
        assert_eq!(summary.seen_total, 5);

        let persisted = SeenStore::new(&seen_file).load().await;
        assert_eq!(persisted.len(), 5);
        assert!(persisted.contains("https://third.example/jobs/2"));
    }

    #[tokio::test]
    async fn digest_has_one_row_per_new_job() {
        let dir = tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let pipeline = RunPipeline::new(config(dir.path().join("seen.json"), true))
            .expect("pipeline")
            .with_adapters(vec![
                adapter("first", Some(jobs("first", 0..2))),
                adapter("broken", None),
                adapter("third", Some(jobs("third", 0..3))),
            ])
            .with_notifier(Box::new(notifier.clone()));

        pipeline.run_once().await.expect("run succeeds");
        let sent = notifier.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].job_count, 5);
        assert_eq!(sent[0].html.matches("<tr class=\"job-row\">").count(), 5);
    }

    #[tokio::test]
    async fn empty_sources_fail_without_touching_seen_file() {
        let dir = tempdir().expect("tempdir");
        let seen_file = dir.path().join("seen_jobs.json");
        std::fs::write(&seen_file, r#"["https://old.example/1"]"#).expect("seed");

        let pipeline = RunPipeline::new(config(seen_file.clone(), true))
            .expect("pipeline")
            .with_adapters(vec![adapter("a", Some(Vec::new())), adapter("b", None)]);

        let err = pipeline.run_once().await.expect_err("no jobs");
        assert!(matches!(err, RunError::Aggregate(_)));
        assert_eq!(err.category(), "aggregation");
        assert_eq!(err.to_string(), "No jobs found from any source.");
        assert_eq!(
            std::fs::read_to_string(&seen_file).expect("read"),
            r#"["https://old.example/1"]"#
        );
    }

    #[tokio::test]
    async fn live_mode_without_credentials_is_a_configuration_failure() {
        let dir = tempdir().expect("tempdir");
        let seen_file = dir.path().join("seen_jobs.json");
        let pipeline = RunPipeline::new(config(seen_file.clone(), false))
            .expect("pipeline")
            .with_adapters(vec![adapter("first", Some(jobs("first", 0..2)))]);

        let err = pipeline.run_once().await.expect_err("missing credentials");
        assert!(matches!(err, RunError::Notify(NotifyError::MissingCredentials)));
        assert_eq!(err.category(), "configuration");
        assert!(!seen_file.exists());
    }

    #[tokio::test]
    async fn smtp_failure_leaves_seen_file_untouched() {
        let dir = tempdir().expect("tempdir");
        let seen_file = dir.path().join("seen_jobs.json");
        std::fs::write(&seen_file, r#"["https://old.example/1"]"#).expect("seed");
        let before = std::fs::read(&seen_file).expect("read");

        let closed_port = std::net::TcpListener::bind("127.0.0.1:0")
            .and_then(|listener| listener.local_addr())
            .expect("local port")
            .port();
        let mut config = config(seen_file.clone(), false);
        config.mail.smtp_host = "127.0.0.1".to_string();
        config.mail.smtp_port = closed_port;
        config.mail.username = Some("me@example.com".to_string());
        config.mail.password = Some("app-password".to_string());

        let pipeline = RunPipeline::new(config)
            .expect("pipeline")
            .with_adapters(vec![adapter("first", Some(jobs("first", 0..2)))]);

        let err = pipeline.run_once().await.expect_err("smtp unreachable");
        assert!(matches!(err, RunError::Notify(NotifyError::Transport(_))));
        assert_eq!(err.category(), "transport");
        assert_eq!(std::fs::read(&seen_file).expect("read"), before);
    }

    #[tokio::test]
    async fn nothing_new_is_a_quiet_success() {
        let dir = tempdir().expect("tempdir");
        let seen_file = dir.path().join("seen_jobs.json");
        let known = jobs("first", 0..2);
        let mut seen = SeenSet::new();
        seen.extend_from_jobs(&known);
        SeenStore::new(&seen_file).save(&seen).await.expect("seed");
        let before = std::fs::read_to_string(&seen_file).expect("read");

        let notifier = RecordingNotifier::default();
        let pipeline = RunPipeline::new(config(seen_file.clone(), false))
            .expect("pipeline")
            .with_adapters(vec![adapter("first", Some(known))])
            .with_notifier(Box::new(notifier.clone()));

        let outcome = pipeline.run_once().await.expect("no-op run");
        assert!(matches!(outcome, RunOutcome::NothingNew { fetched_total: 2, .. }));
        assert!(notifier.sent.lock().expect("lock").is_empty());
        assert_eq!(std::fs::read_to_string(&seen_file).expect("read"), before);
    }
}
