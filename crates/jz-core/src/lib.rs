//! Core domain model for Junior Zone: job postings, ledger entries, date windows and tables.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "jz-core";

/// Calendar format shared by the window bounds and daily file names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("raw job is missing required field `{0}`")]
    MissingField(&'static str),
}

/// Handoff contract from fetch adapters: one posting exactly as the recruiting API returned it.
///
/// Every field is optional and scalar-lenient so a single odd value never fails a whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawJob {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub published_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub career_page_name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient_text")]
    pub job_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub application_deadline: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub is_remote_work: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub job_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub disabilities: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub workplace_type: Option<String>,
}

impl RawJob {
    /// Identifier as received, if present and non-blank.
    pub fn job_id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }

    pub fn published(&self) -> Option<&str> {
        non_blank(self.published_date.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<JsonValue>::deserialize(deserializer)?;
    Ok(match value {
        Some(JsonValue::Bool(b)) => Some(b),
        Some(JsonValue::Number(n)) => n.as_i64().map(|n| n != 0),
        Some(JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Accepted posting; field names double as the daily export column names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    #[serde(rename = "job_id")]
    pub id: String,
    pub published_date: String,
    pub title: String,
    pub description: String,
    pub career_page_name: String,
    #[serde(rename = "type")]
    pub employment_type: String,
    pub application_deadline: String,
    pub is_remote_work: bool,
    pub city: String,
    pub state: String,
    pub country: String,
    #[serde(rename = "job_url")]
    pub url: String,
    pub disabilities: String,
    pub workplace_type: String,
}

impl JobRecord {
    pub fn is_hybrid(&self) -> bool {
        self.workplace_type == "hybrid"
    }
}

impl TryFrom<&RawJob> for JobRecord {
    type Error = RecordError;

    fn try_from(raw: &RawJob) -> Result<Self, Self::Error> {
        let id = raw.job_id().ok_or(RecordError::MissingField("id"))?;
        let published_date = raw
            .published()
            .ok_or(RecordError::MissingField("publishedDate"))?;
        let text = |v: &Option<String>| v.clone().unwrap_or_default();

        Ok(Self {
            id: id.to_string(),
            published_date: published_date.to_string(),
            title: text(&raw.name),
            description: text(&raw.description),
            career_page_name: text(&raw.career_page_name),
            employment_type: text(&raw.job_type),
            application_deadline: text(&raw.application_deadline),
            is_remote_work: raw.is_remote_work.unwrap_or(false),
            city: text(&raw.city),
            state: text(&raw.state),
            country: text(&raw.country),
            url: text(&raw.job_url),
            disabilities: text(&raw.disabilities),
            workplace_type: text(&raw.workplace_type),
        })
    }
}

/// One row of the persisted identity ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub job_id: String,
    pub published_date: String,
}

/// Two calendar dates a posting's `publishedDate` must start with to be accepted.
///
/// Matching is a string prefix test on purpose: `2024-01-02T10:00:00` is inside a window
/// bounded by `2024-01-02`, whatever the time-of-day suffix or its timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindow {
    bounds: [NaiveDate; 2],
    prefixes: [String; 2],
}

impl DateWindow {
    pub fn new(first: NaiveDate, second: NaiveDate) -> Self {
        Self {
            bounds: [first, second],
            prefixes: [
                first.format(DATE_FORMAT).to_string(),
                second.format(DATE_FORMAT).to_string(),
            ],
        }
    }

    /// `(today, yesterday)` relative to `today`.
    pub fn ending_on(today: NaiveDate) -> Self {
        Self::new(today, today.pred_opt().unwrap_or(today))
    }

    /// Window for the local calendar day, recomputed on each call.
    pub fn current() -> Self {
        Self::ending_on(Local::now().date_naive())
    }

    pub fn bounds(&self) -> (NaiveDate, NaiveDate) {
        (self.bounds[0], self.bounds[1])
    }

    pub fn admits(&self, published_date: &str) -> bool {
        self.prefixes
            .iter()
            .any(|prefix| published_date.starts_with(prefix.as_str()))
    }
}

/// Column-ordered string table used for every tabular export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, header: &str) -> Option<Vec<&str>> {
        let idx = self.headers.iter().position(|h| h == header)?;
        Some(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }
}

/// Named, ordered columns of the accepted-record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobColumn {
    JobId,
    PublishedDate,
    Title,
    Description,
    CareerPageName,
    EmploymentType,
    ApplicationDeadline,
    IsRemoteWork,
    City,
    State,
    Country,
    JobUrl,
    Disabilities,
    WorkplaceType,
}

impl JobColumn {
    /// Daily raw export layout.
    pub const ALL: [JobColumn; 14] = [
        JobColumn::JobId,
        JobColumn::PublishedDate,
        JobColumn::Title,
        JobColumn::Description,
        JobColumn::CareerPageName,
        JobColumn::EmploymentType,
        JobColumn::ApplicationDeadline,
        JobColumn::IsRemoteWork,
        JobColumn::City,
        JobColumn::State,
        JobColumn::Country,
        JobColumn::JobUrl,
        JobColumn::Disabilities,
        JobColumn::WorkplaceType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobColumn::JobId => "job_id",
            JobColumn::PublishedDate => "published_date",
            JobColumn::Title => "title",
            JobColumn::Description => "description",
            JobColumn::CareerPageName => "career_page_name",
            JobColumn::EmploymentType => "type",
            JobColumn::ApplicationDeadline => "application_deadline",
            JobColumn::IsRemoteWork => "is_remote_work",
            JobColumn::City => "city",
            JobColumn::State => "state",
            JobColumn::Country => "country",
            JobColumn::JobUrl => "job_url",
            JobColumn::Disabilities => "disabilities",
            JobColumn::WorkplaceType => "workplace_type",
        }
    }

    pub fn value(self, record: &JobRecord) -> String {
        match self {
            JobColumn::JobId => record.id.clone(),
            JobColumn::PublishedDate => record.published_date.clone(),
            JobColumn::Title => record.title.clone(),
            JobColumn::Description => record.description.clone(),
            JobColumn::CareerPageName => record.career_page_name.clone(),
            JobColumn::EmploymentType => record.employment_type.clone(),
            JobColumn::ApplicationDeadline => record.application_deadline.clone(),
            JobColumn::IsRemoteWork => record.is_remote_work.to_string(),
            JobColumn::City => record.city.clone(),
            JobColumn::State => record.state.clone(),
            JobColumn::Country => record.country.clone(),
            JobColumn::JobUrl => record.url.clone(),
            JobColumn::Disabilities => record.disabilities.clone(),
            JobColumn::WorkplaceType => record.workplace_type.clone(),
        }
    }
}
