//! Ingestion and report runs: fetch -> validate against the ledger -> store -> report -> export.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use jz_adapters::{
    fetch_all, ApiSourceConfig, GupyApiSource, JobSource, TermBatch, DEFAULT_API_URL,
    DEFAULT_PAGE_LIMIT, DEFAULT_USER_AGENT,
};
use jz_core::{DateWindow, JobRecord, RawJob, DATE_FORMAT};
use jz_report::{Period, ReportBuilder};
use jz_storage::{
    write_table_csv, ArchiveError, ArchiveSheet, Ledger, RecordStore, ReportArchive,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jz-sync";

pub const DEFAULT_SEARCH_TERMS: [&str; 4] = ["analista", "dados", "python", "data"];

/// Why a raw posting was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rejection {
    OutOfWindow,
    Duplicate,
    /// Missing id or publication date.
    Malformed,
}

/// Decides whether raw postings enter the run, registering accepted ids in the ledger.
///
/// The date check runs first: an out-of-window posting is never written to the ledger and
/// may be accepted by a later run whose window covers it.
pub struct IngestionValidator<'a> {
    ledger: &'a mut Ledger,
}

impl<'a> IngestionValidator<'a> {
    pub fn new(ledger: &'a mut Ledger) -> Self {
        Self { ledger }
    }

    pub fn accept(&mut self, raw: &RawJob, window: &DateWindow) -> bool {
        self.admit(raw, window).is_ok()
    }

    pub fn admit(&mut self, raw: &RawJob, window: &DateWindow) -> Result<JobRecord, Rejection> {
        let Some(published) = raw.published() else {
            return Err(Rejection::Malformed);
        };
        if !window.admits(published) {
            return Err(Rejection::OutOfWindow);
        }
        let record = JobRecord::try_from(raw).map_err(|_| Rejection::Malformed)?;
        if self.ledger.contains(&record.id) {
            return Err(Rejection::Duplicate);
        }
        self.ledger.record(&record.id, &record.published_date);
        Ok(record)
    }

    pub fn ledger(&self) -> &Ledger {
        &*self.ledger
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub fetched: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub out_of_window: usize,
    pub malformed: usize,
}

/// Validate batches strictly in order, so the first occurrence of an id wins.
pub fn ingest_batches(
    batches: &[TermBatch],
    ledger: &mut Ledger,
    window: &DateWindow,
) -> (RecordStore, IngestCounts) {
    let mut validator = IngestionValidator::new(ledger);
    let mut store = RecordStore::new();
    let mut counts = IngestCounts::default();

    for batch in batches {
        for raw in &batch.jobs {
            counts.fetched += 1;
            match validator.admit(raw, window) {
                Ok(record) => {
                    counts.accepted += 1;
                    debug!(term = %batch.term, job_id = %record.id, "accepted");
                    store.append(record);
                }
                Err(Rejection::Duplicate) => counts.duplicates += 1,
                Err(Rejection::OutOfWindow) => counts.out_of_window += 1,
                Err(Rejection::Malformed) => {
                    counts.malformed += 1;
                    warn!(term = %batch.term, job_id = ?raw.job_id(), "skipping malformed posting");
                }
            }
        }
    }

    (store, counts)
}

#[derive(Debug, Clone, Deserialize)]
struct SearchTermsFile {
    terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub data_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub api_url: String,
    pub page_limit: usize,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub search_terms: Vec<String>,
    pub scheduler_enabled: bool,
    pub cron_morning: String,
    pub cron_afternoon: String,
    pub workspace_root: PathBuf,
}

impl SyncConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            ledger_path: data_dir.join("job_ids.csv"),
            data_dir,
            api_url: DEFAULT_API_URL.to_string(),
            page_limit: DEFAULT_PAGE_LIMIT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            search_terms: DEFAULT_SEARCH_TERMS.iter().map(|s| s.to_string()).collect(),
            scheduler_enabled: false,
            cron_morning: "0 0 8 * * *".to_string(),
            cron_afternoon: "0 0 14 * * *".to_string(),
            workspace_root: PathBuf::from("."),
        }
    }

    pub fn from_env() -> Self {
        let data_dir = std::env::var("JZ_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let defaults = Self::new(data_dir);
        Self {
            ledger_path: std::env::var("JZ_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            api_url: std::env::var("JZ_API_URL").unwrap_or(defaults.api_url),
            page_limit: std::env::var("JZ_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.page_limit),
            user_agent: std::env::var("JZ_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("JZ_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            search_terms: std::env::var("JZ_SEARCH_TERMS")
                .map(|v| split_terms(&v))
                .ok()
                .filter(|terms| !terms.is_empty())
                .unwrap_or(defaults.search_terms),
            scheduler_enabled: std::env::var("JZ_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron_morning: std::env::var("JZ_CRON_MORNING").unwrap_or(defaults.cron_morning),
            cron_afternoon: std::env::var("JZ_CRON_AFTERNOON").unwrap_or(defaults.cron_afternoon),
            ..defaults
        }
    }

    /// `search_terms.yaml` in the workspace root wins over the configured list.
    pub fn load_search_terms(&self) -> Result<Vec<String>> {
        let path = self.workspace_root.join("search_terms.yaml");
        if !path.exists() {
            return Ok(self.search_terms.clone());
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let file: SearchTermsFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(file
            .terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }

    pub fn daily_export_path(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(format!("{}.csv", date.format(DATE_FORMAT)))
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }

    pub fn api_source_config(&self) -> ApiSourceConfig {
        ApiSourceConfig {
            api_url: self.api_url.clone(),
            page_limit: self.page_limit,
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn split_terms(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub terms: usize,
    pub failed_terms: usize,
    pub counts: IngestCounts,
    pub ledger_entries: usize,
    pub daily_export: PathBuf,
}

/// What happened to the day's export sheet in the cumulative archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArchiveOutcome {
    Appended(ArchiveSheet),
    /// The date already had a sheet; the archive is unchanged.
    Conflict { sheet: String, path: PathBuf },
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub run_id: Uuid,
    pub generated_at: NaiveDateTime,
    pub period: Period,
    pub message: String,
    pub section_counts: Vec<(String, usize)>,
    pub export_rows: usize,
    pub message_path: PathBuf,
    pub export_path: PathBuf,
    pub archive: ArchiveOutcome,
}

impl ReportSummary {
    /// Name of the sheet that blocked archiving, if any.
    pub fn archive_conflict(&self) -> Option<&str> {
        match &self.archive {
            ArchiveOutcome::Conflict { sheet, .. } => Some(sheet.as_str()),
            ArchiveOutcome::Appended(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ingest: IngestSummary,
    pub report: ReportSummary,
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Box<dyn JobSource>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let source = GupyApiSource::new(config.api_source_config())?;
        Ok(Self {
            config,
            source: Box::new(source),
        })
    }

    pub fn with_source(mut self, source: Box<dyn JobSource>) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Fetch, validate and append the day's accepted records, then persist the ledger.
    pub async fn run_ingest(&self, today: NaiveDate) -> Result<IngestSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, date = %today);

        async move {
            let terms = self.config.load_search_terms()?;
            let batches = fetch_all(self.source.as_ref(), &terms).await;
            let failed_terms = batches.iter().filter(|b| b.failed).count();

            let mut ledger = Ledger::load(&self.config.ledger_path)?;
            let window = DateWindow::ending_on(today);
            let (store, counts) = ingest_batches(&batches, &mut ledger, &window);

            let daily_export = self.config.daily_export_path(today);
            store.append_csv(&daily_export)?;
            if let Err(err) = ledger.persist() {
                let ids = store.records().iter().map(|r| r.id.as_str()).collect::<Vec<_>>();
                warn!(
                    export = %daily_export.display(),
                    ?ids,
                    "rows appended to the daily export without a ledger entry; a rerun will append them again"
                );
                return Err(err);
            }

            info!(
                fetched = counts.fetched,
                accepted = counts.accepted,
                duplicates = counts.duplicates,
                out_of_window = counts.out_of_window,
                malformed = counts.malformed,
                failed_terms,
                "ingest complete"
            );

            Ok::<_, anyhow::Error>(IngestSummary {
                run_id,
                date: today,
                terms: terms.len(),
                failed_terms,
                counts,
                ledger_entries: ledger.len(),
                daily_export,
            })
        }
        .instrument(span)
        .await
    }

    /// Build the message and exports from the day's records and archive the export sheet.
    pub fn run_report(&self, generated_at: NaiveDateTime) -> Result<ReportSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("report_run", %run_id, %generated_at);
        let _guard = span.enter();

        let date = generated_at.date();
        let date_key = date.format(DATE_FORMAT).to_string();
        let daily_export = self.config.daily_export_path(date);
        let store = if daily_export.exists() {
            RecordStore::read_csv(&daily_export)?
        } else {
            warn!(path = %daily_export.display(), "no daily export; reporting on zero records");
            RecordStore::new()
        };

        let report = ReportBuilder::new(generated_at).build(store.records());

        let reports_dir = self.config.reports_dir();
        fs::create_dir_all(&reports_dir)
            .with_context(|| format!("creating {}", reports_dir.display()))?;
        let message_path = reports_dir.join(format!("{date_key}-{}.md", report.period.slug()));
        fs::write(&message_path, &report.message)
            .with_context(|| format!("writing {}", message_path.display()))?;
        let export_path = reports_dir.join(format!("{date_key}.csv"));
        write_table_csv(&export_path, &report.export)?;

        let archive = match ReportArchive::new(self.config.archive_dir())
            .append_sheet(&date_key, &report.export)
        {
            Ok(sheet) => ArchiveOutcome::Appended(sheet),
            Err(ArchiveError::SheetExists { sheet, path }) => {
                warn!(
                    %sheet,
                    path = %path.display(),
                    message = %message_path.display(),
                    "archive already has a sheet for this date; leaving it unchanged"
                );
                ArchiveOutcome::Conflict { sheet, path }
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "archiving report for {date_key} (message kept at {})",
                        message_path.display()
                    )
                })
            }
        };

        let section_counts = report
            .sections
            .iter()
            .map(|s| (s.name.to_string(), s.records.len()))
            .collect::<Vec<_>>();
        info!(records = store.len(), export_rows = report.export.len(), "report complete");

        Ok(ReportSummary {
            run_id,
            generated_at,
            period: report.period,
            message: report.message,
            section_counts,
            export_rows: report.export.len(),
            message_path,
            export_path,
            archive,
        })
    }

    pub async fn run_once(&self, now: NaiveDateTime) -> Result<RunSummary> {
        let ingest = self.run_ingest(now.date()).await?;
        let report = self.run_report(now)?;
        Ok(RunSummary { ingest, report })
    }

    /// Morning and afternoon jobs; a shared lock keeps one run at a time against the ledger.
    pub async fn maybe_build_scheduler(self: Arc<Self>) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let gate = Arc::new(Mutex::new(()));
        for cron in [&self.config.cron_morning, &self.config.cron_afternoon] {
            let pipeline = Arc::clone(&self);
            let gate = Arc::clone(&gate);
            let job = Job::new_async(cron, move |_uuid, _l| {
                let pipeline = Arc::clone(&pipeline);
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    let _running = gate.lock().await;
                    match pipeline.run_once(Local::now().naive_local()).await {
                        Ok(summary) => match summary.report.archive_conflict() {
                            None => info!(
                                accepted = summary.ingest.counts.accepted,
                                export_rows = summary.report.export_rows,
                                "scheduled run complete"
                            ),
                            Some(sheet) => warn!(
                                accepted = summary.ingest.counts.accepted,
                                %sheet,
                                "scheduled run delivered its message but could not archive the export"
                            ),
                        },
                        Err(err) => error!(error = ?err, "scheduled run failed"),
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}

/// Run the scheduler until Ctrl-C.
pub async fn run_scheduler_until_shutdown(pipeline: Arc<SyncPipeline>) -> Result<()> {
    let Some(mut sched) = pipeline.maybe_build_scheduler().await? else {
        warn!("scheduler disabled; set JZ_SCHEDULER_ENABLED=true to enable it");
        return Ok(());
    };
    sched.start().await.context("starting scheduler")?;
    info!("scheduler running; waiting for ctrl-c");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
