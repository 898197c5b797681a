//! Durable state for Junior Zone: the identity ledger, daily record exports and the report archive.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use jz_core::{JobColumn, JobRecord, LedgerEntry, Table};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

pub const CRATE_NAME: &str = "jz-storage";

pub const LEDGER_HEADERS: [&str; 2] = ["job_id", "published_date"];

/// Append-only registry of job ids that were already accepted by some run.
///
/// Rows recorded during a run stay pending until [`Ledger::persist`] appends them to the
/// backing CSV file, so a run that fails before exporting its records leaves no trace.
#[derive(Debug, Default)]
pub struct Ledger {
    path: Option<PathBuf>,
    seen: HashSet<String>,
    entries: Vec<LedgerEntry>,
    persisted: usize,
}

impl Ledger {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load prior state; a missing file is an empty ledger.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = Self {
            path: Some(path.clone()),
            ..Self::default()
        };

        if !path.exists() {
            info!(path = %path.display(), "no ledger yet; starting empty");
            return Ok(ledger);
        }

        let mut reader = csv::ReaderBuilder::new()
            .from_path(&path)
            .with_context(|| format!("opening ledger {}", path.display()))?;
        for row in reader.deserialize::<LedgerEntry>() {
            let entry = row.with_context(|| format!("parsing ledger {}", path.display()))?;
            if ledger.seen.insert(entry.job_id.clone()) {
                ledger.entries.push(entry);
            }
        }
        ledger.persisted = ledger.entries.len();
        info!(path = %path.display(), entries = ledger.entries.len(), "ledger loaded");
        Ok(ledger)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.seen.contains(job_id)
    }

    /// Register an accepted id. Returns `false` without touching state if it is already known.
    pub fn record(&mut self, job_id: &str, published_date: &str) -> bool {
        if !self.seen.insert(job_id.to_string()) {
            return false;
        }
        self.entries.push(LedgerEntry {
            job_id: job_id.to_string(),
            published_date: published_date.to_string(),
        });
        true
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn pending(&self) -> &[LedgerEntry] {
        &self.entries[self.persisted..]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append pending entries to the backing file. In-memory ledgers only mark them persisted.
    pub fn persist(&mut self) -> Result<usize> {
        let pending = self.entries.len() - self.persisted;
        if let Some(path) = &self.path {
            let mut writer = open_append_writer(path, &LEDGER_HEADERS)?;
            for entry in self.pending() {
                writer
                    .write_record([entry.job_id.as_str(), entry.published_date.as_str()])
                    .with_context(|| format!("appending to ledger {}", path.display()))?;
            }
            writer
                .flush()
                .with_context(|| format!("flushing ledger {}", path.display()))?;
            debug!(path = %path.display(), appended = pending, "ledger persisted");
        }
        self.persisted = self.entries.len();
        Ok(pending)
    }
}

/// Opens `path` for appending, writing `headers` first when the file is new or empty.
fn open_append_writer(path: &Path, headers: &[&str]) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {} for append", path.display()))?;
    let is_empty = file
        .metadata()
        .with_context(|| format!("reading metadata of {}", path.display()))?
        .len()
        == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_empty {
        writer
            .write_record(headers)
            .with_context(|| format!("writing header to {}", path.display()))?;
    }
    Ok(writer)
}

/// Accepted records of one run. Trusts its input; deduplication happens upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStore {
    records: Vec<JobRecord>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: JobRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn export(&self, columns: &[JobColumn]) -> Table {
        let mut table = Table::new(columns.iter().map(|c| c.name()));
        for record in &self.records {
            table.push_row(columns.iter().map(|c| c.value(record)).collect());
        }
        table
    }

    /// Append every record to the daily export at `path`, header included on first write.
    pub fn append_csv(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let table = self.export(&JobColumn::ALL);
        let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
        let mut writer = open_append_writer(path, &headers)?;
        for row in &table.rows {
            writer
                .write_record(row)
                .with_context(|| format!("writing record to {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("flushing {}", path.display()))?;
        info!(path = %path.display(), rows = table.len(), "daily export appended");
        Ok(table.len())
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader =
            csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
        let mut store = Self::new();
        for row in reader.deserialize::<JobRecord>() {
            store.append(row.with_context(|| format!("parsing {}", path.display()))?);
        }
        Ok(store)
    }
}

/// Overwrite `path` with `table` as CSV.
pub fn write_table_csv(path: impl AsRef<Path>, table: &Table) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer
        .write_record(&table.headers)
        .with_context(|| format!("writing header to {}", path.display()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .with_context(|| format!("writing row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive already has a sheet named `{sheet}` ({})", path.display())]
    SheetExists { sheet: String, path: PathBuf },
    #[error("invalid archive sheet name `{0}`")]
    InvalidSheetName(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub schema_version: u32,
    pub sheets: Vec<ArchiveSheet>,
}

impl Default for ArchiveManifest {
    fn default() -> Self {
        Self {
            schema_version: 1,
            sheets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSheet {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

/// Cumulative multi-sheet archive: one parquet file per sheet plus a JSON manifest.
///
/// Sheets are never overwritten; adding one that exists is an [`ArchiveError::SheetExists`].
#[derive(Debug, Clone)]
pub struct ReportArchive {
    root: PathBuf,
}

impl ReportArchive {
    pub const MANIFEST: &'static str = "manifest.json";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.root.join(format!("{sheet}.parquet"))
    }

    pub fn load_manifest(&self) -> Result<ArchiveManifest> {
        let path = self.root.join(Self::MANIFEST);
        if !path.exists() {
            return Ok(ArchiveManifest::default());
        }
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn append_sheet(&self, sheet: &str, table: &Table) -> Result<ArchiveSheet, ArchiveError> {
        if sheet.is_empty() || sheet.contains(['/', '\\']) || sheet.starts_with('.') {
            return Err(ArchiveError::InvalidSheetName(sheet.to_string()));
        }

        let mut manifest = self.load_manifest()?;
        let path = self.sheet_path(sheet);
        if path.exists() || manifest.sheets.iter().any(|s| s.name == sheet) {
            return Err(ArchiveError::SheetExists {
                sheet: sheet.to_string(),
                path,
            });
        }

        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating archive directory {}", self.root.display()))?;
        let temp_path = self.root.join(format!(".{sheet}.parquet.tmp"));
        write_parquet(&temp_path, table)?;
        fs::rename(&temp_path, &path).with_context(|| {
            format!(
                "renaming archive sheet {} -> {}",
                temp_path.display(),
                path.display()
            )
        })?;

        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let entry = ArchiveSheet {
            name: sheet.to_string(),
            path: format!("{sheet}.parquet"),
            sha256: sha256_hex(&bytes),
            bytes: bytes.len() as u64,
            rows: table.len(),
        };
        manifest.sheets.push(entry.clone());
        self.write_manifest(&manifest)?;
        info!(sheet, rows = entry.rows, "archive sheet added");
        Ok(entry)
    }

    pub fn read_sheet(&self, sheet: &str) -> Result<Table> {
        read_parquet(&self.sheet_path(sheet))
    }

    fn write_manifest(&self, manifest: &ArchiveManifest) -> Result<()> {
        let path = self.root.join(Self::MANIFEST);
        let temp_path = self.root.join(format!(".{}.tmp", Self::MANIFEST));
        let bytes =
            serde_json::to_vec_pretty(manifest).context("serializing archive manifest")?;
        fs::write(&temp_path, bytes)
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }
}

fn write_parquet(path: &Path, table: &Table) -> Result<()> {
    let schema = Arc::new(Schema::new(
        table
            .headers
            .iter()
            .map(|h| ArrowField::new(h.as_str(), DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let columns = (0..table.headers.len())
        .map(|idx| {
            let values = table
                .rows
                .iter()
                .map(|row| row[idx].as_str())
                .collect::<Vec<_>>();
            Arc::new(StringArray::from(values)) as Arc<dyn Array>
        })
        .collect::<Vec<_>>();
    let batch = RecordBatch::try_new(schema, columns).context("building archive record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet metadata {}", path.display()))?;
    let mut table = Table::new(builder.schema().fields().iter().map(|f| f.name().clone()));
    let reader = builder
        .build()
        .with_context(|| format!("opening parquet reader {}", path.display()))?;

    for batch in reader {
        let batch = batch.with_context(|| format!("reading record batch {}", path.display()))?;
        let columns = batch
            .columns()
            .iter()
            .map(|col| {
                col.as_any()
                    .downcast_ref::<StringArray>()
                    .with_context(|| format!("non-string column in {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        for row in 0..batch.num_rows() {
            table.push_row(columns.iter().map(|c| c.value(row).to_string()).collect());
        }
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn mk_record(id: &str, title: &str) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            published_date: "2024-01-02T10:00:00.000Z".to_string(),
            title: title.to_string(),
            description: "Linha 1\nRequisitos e qualificações: SQL; \"Python\"".to_string(),
            career_page_name: "Acme, Inc.".to_string(),
            employment_type: "vacancy_type_effective".to_string(),
            application_deadline: String::new(),
            is_remote_work: id.len() % 2 == 0,
            city: "São Paulo".to_string(),
            state: "SP".to_string(),
            country: "Brasil".to_string(),
            url: format!("https://acme.example/jobs/{id}"),
            disabilities: "true".to_string(),
            workplace_type: "hybrid".to_string(),
        }
    }

    #[test]
    fn missing_ledger_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let ledger = Ledger::load(dir.path().join("job_ids.csv")).expect("load");
        assert!(ledger.is_empty());
        assert!(!ledger.contains("1"));
    }

    #[test]
    fn ledger_record_is_idempotent_and_survives_reload() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state").join("job_ids.csv");

        let mut ledger = Ledger::load(&path).expect("load");
        assert!(ledger.record("10", "2024-01-02"));
        assert!(!ledger.record("10", "2024-01-02"));
        assert!(ledger.record("11", "2024-01-01"));
        assert_eq!(ledger.persist().expect("persist"), 2);
        assert_eq!(ledger.persist().expect("second persist"), 0);

        let mut reloaded = Ledger::load(&path).expect("reload");
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.contains("10"));
        assert!(reloaded.pending().is_empty());

        assert!(reloaded.record("12", "2024-01-02"));
        reloaded.persist().expect("persist again");

        let text = fs::read_to_string(&path).expect("read ledger");
        assert_eq!(text.matches("job_id,published_date").count(), 1);
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn ledger_keeps_padded_ids_verbatim() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("job_ids.csv");

        let mut ledger = Ledger::load(&path).expect("load");
        assert!(ledger.record(" 7 ", " 2024-01-02"));
        ledger.persist().expect("persist");

        let reloaded = Ledger::load(&path).expect("reload");
        assert!(reloaded.contains(" 7 "));
        assert!(!reloaded.contains("7"));
        assert_eq!(reloaded.entries()[0].published_date, " 2024-01-02");
    }

    #[test]
    fn export_projects_requested_columns_in_order() {
        let mut store = RecordStore::new();
        store.append(mk_record("1", "Analista Jr"));
        let table = store.export(&[JobColumn::Title, JobColumn::JobId]);
        assert_eq!(table.headers, vec!["title", "job_id"]);
        assert_eq!(table.rows, vec![vec!["Analista Jr".to_string(), "1".to_string()]]);
    }

    #[test]
    fn daily_export_round_trips_records() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("2024-01-02.csv");

        let mut first = RecordStore::new();
        first.append(mk_record("1", "Analista de Dados Jr"));
        first.append(mk_record("22", "Estágio em Dados"));
        first.append_csv(&path).expect("first append");

        let mut second = RecordStore::new();
        second.append(mk_record("333", "Trainee (Python)"));
        second.append_csv(&path).expect("second append");

        let read = RecordStore::read_csv(&path).expect("read back");
        let expected: BTreeMap<_, _> = first
            .records()
            .iter()
            .chain(second.records())
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        let actual: BTreeMap<_, _> = read
            .records()
            .iter()
            .map(|r| (r.id.clone(), r.clone()))
            .collect();
        assert_eq!(read.len(), 3);
        assert_eq!(actual, expected);
    }

    #[test]
    fn empty_store_still_writes_header() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("empty.csv");
        RecordStore::new().append_csv(&path).expect("append");
        let read = RecordStore::read_csv(&path).expect("read");
        assert!(read.is_empty());
        let text = fs::read_to_string(&path).expect("read text");
        assert!(text.starts_with("job_id,published_date,title"));
    }

    fn report_table(rows: &[(&str, &str)]) -> Table {
        let mut table = Table::new(["Date", "Job Title"]);
        for (date, title) in rows {
            table.push_row(vec![date.to_string(), title.to_string()]);
        }
        table
    }

    #[test]
    fn archive_appends_sheets_and_refuses_overwrite() {
        let dir = tempdir().expect("tempdir");
        let archive = ReportArchive::new(dir.path().join("archive"));

        let day_one = report_table(&[("2024-01-01", "Analista Jr")]);
        let day_two = report_table(&[("2024-01-02", "Dev Jr"), ("2024-01-02", "Estágio")]);

        let sheet = archive.append_sheet("2024-01-01", &day_one).expect("day one");
        assert_eq!(sheet.rows, 1);
        archive.append_sheet("2024-01-02", &day_two).expect("day two");

        let before = fs::read(archive.sheet_path("2024-01-01")).expect("sheet bytes");
        let err = archive
            .append_sheet("2024-01-01", &day_two)
            .expect_err("conflict");
        assert!(matches!(err, ArchiveError::SheetExists { ref sheet, .. } if sheet == "2024-01-01"));
        let after = fs::read(archive.sheet_path("2024-01-01")).expect("sheet bytes");
        assert_eq!(before, after);

        let manifest = archive.load_manifest().expect("manifest");
        let names: Vec<_> = manifest.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["2024-01-01", "2024-01-02"]);
        assert_eq!(manifest.sheets[0].sha256, sha256_hex(&before));

        assert_eq!(archive.read_sheet("2024-01-02").expect("read"), day_two);
    }

    #[test]
    fn archive_rejects_path_like_sheet_names() {
        let dir = tempdir().expect("tempdir");
        let archive = ReportArchive::new(dir.path());
        let err = archive
            .append_sheet("../escape", &report_table(&[]))
            .expect_err("invalid");
        assert!(matches!(err, ArchiveError::InvalidSheetName(_)));
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
