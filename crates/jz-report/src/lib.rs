//! Report construction: junior-level filtering, sectioning and the chat message template.
//!
//! The message targets a markdown dialect where a fixed set of characters is significant.
//! Template literals below are written already escaped; every interpolated field goes
//! through [`escape_markdown`] exactly once.

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use jz_core::{JobColumn, JobRecord, Table};
use serde::Serialize;
use tracing::debug;

pub const CRATE_NAME: &str = "jz-report";

/// Characters that must be prefixed with `\` inside interpolated text.
pub const RESERVED_CHARS: [char; 19] = [
    '.', '(', ')', '|', '-', '+', '[', ']', '{', '}', '!', '#', '~', '`', '>', '*', '_', '=', '<',
];

/// Case-insensitive substrings that mark a title as not junior. Matched anywhere in the
/// title, so "PL" also drops e.g. "Plataforma".
pub const SENIORITY_EXCLUSIONS: [&str; 5] = ["PLENO", "SÊNIOR", "SENIOR", "SR", "PL"];

pub const EXPORT_HEADERS: [&str; 7] = [
    "Date",
    "Job Title",
    "Company Name",
    "Work Type",
    "URL",
    "City",
    "State",
];

const EXPORT_COLUMNS: [JobColumn; 7] = [
    JobColumn::PublishedDate,
    JobColumn::Title,
    JobColumn::CareerPageName,
    JobColumn::WorkplaceType,
    JobColumn::JobUrl,
    JobColumn::City,
    JobColumn::State,
];

const SECTION_COLUMNS: [JobColumn; 8] = [
    JobColumn::JobId,
    JobColumn::PublishedDate,
    JobColumn::Title,
    JobColumn::CareerPageName,
    JobColumn::WorkplaceType,
    JobColumn::JobUrl,
    JobColumn::City,
    JobColumn::State,
];

pub const DEFAULT_FOOTER: &str = "Gostou do projeto? Você pode contribuir com uma ⭐️ no repositório:\n[GitHub \\- Junior Zone](https://github.com/Moscarde/Junior_Zone)";

pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if RESERVED_CHARS.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Inline link targets only need `)` and `\` escaped.
fn escape_link_target(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for ch in url.chars() {
        if ch == ')' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn is_junior_eligible(title: &str) -> bool {
    let upper = title.to_uppercase();
    !SENIORITY_EXCLUSIONS
        .iter()
        .any(|marker| upper.contains(marker))
}

/// Pulls the `;`-separated requirement list out of a posting description.
#[derive(Debug, Clone)]
pub struct RequirementsExtractor {
    markers: Vec<(String, String)>,
}

impl Default for RequirementsExtractor {
    fn default() -> Self {
        Self::new([
            ("Requisitos e qualificações", "Informações adicionais"),
            ("Requirements and qualifications", "Additional information"),
        ])
    }
}

impl RequirementsExtractor {
    /// `markers` are `(section header, terminator)` pairs, tried in order.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|(start, end)| (start.into(), end.into()))
                .collect(),
        }
    }

    /// Empty when either marker is missing.
    pub fn extract(&self, description: &str) -> Vec<String> {
        for (header, terminator) in &self.markers {
            let Some(start) = description.find(header.as_str()) else {
                continue;
            };
            let body = &description[start + header.len()..];
            let Some(end) = body.find(terminator.as_str()) else {
                continue;
            };
            return body[..end]
                .split(';')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect();
        }
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RenderMode {
    /// Employer and link.
    Compact,
    /// Employer, location line, link.
    WithLocation,
}

/// A named, predicate-filtered group of junior postings.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    pub name: &'static str,
    /// Heading literal, already escaped.
    pub title: &'static str,
    pub predicate: fn(&JobRecord) -> bool,
    pub mode: RenderMode,
}

impl SectionSpec {
    pub fn remote() -> Self {
        Self {
            name: "remote",
            title: "🌐 Vagas Jr \\- Remotas 🌐",
            predicate: |record| record.is_remote_work,
            mode: RenderMode::Compact,
        }
    }

    pub fn hybrid() -> Self {
        Self {
            name: "hybrid",
            title: "🌍 Vagas Jr \\- Híbridas 🌍",
            predicate: JobRecord::is_hybrid,
            mode: RenderMode::WithLocation,
        }
    }

    pub fn defaults() -> Vec<Self> {
        vec![Self::remote(), Self::hybrid()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Period {
    Morning,
    Afternoon,
}

impl Period {
    pub fn of(at: NaiveDateTime) -> Self {
        if at.hour() < 12 {
            Period::Morning
        } else {
            Period::Afternoon
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Period::Morning => "Manhã 🌅",
            Period::Afternoon => "Tarde 🌇",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Afternoon => "afternoon",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: &'static str,
    pub title: &'static str,
    pub mode: RenderMode,
    pub records: Vec<JobRecord>,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub generated_at: NaiveDateTime,
    pub period: Period,
    pub message: String,
    pub sections: Vec<Section>,
    /// Section name -> filtered rows, with a `requirements` column.
    pub tables: BTreeMap<String, Table>,
    /// Remote rows then hybrid rows under human-readable headers.
    pub export: Table,
}

impl Report {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ReportBuilder {
    generated_at: NaiveDateTime,
    sections: Vec<SectionSpec>,
    extractor: RequirementsExtractor,
    footer: String,
}

impl ReportBuilder {
    pub fn new(generated_at: NaiveDateTime) -> Self {
        Self {
            generated_at,
            sections: SectionSpec::defaults(),
            extractor: RequirementsExtractor::default(),
            footer: DEFAULT_FOOTER.to_string(),
        }
    }

    pub fn with_sections(mut self, sections: Vec<SectionSpec>) -> Self {
        self.sections = sections;
        self
    }

    /// Static footer, appended verbatim.
    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = footer.into();
        self
    }

    pub fn build(&self, records: &[JobRecord]) -> Report {
        let mut junior: Vec<JobRecord> = records
            .iter()
            .filter(|record| is_junior_eligible(&record.title))
            .cloned()
            .collect();
        junior.sort_by(|a, b| {
            (a.state.as_str(), a.city.as_str()).cmp(&(b.state.as_str(), b.city.as_str()))
        });
        debug!(input = records.len(), junior = junior.len(), "seniority filter applied");

        let sections: Vec<Section> = self
            .sections
            .iter()
            .map(|spec| Section {
                name: spec.name,
                title: spec.title,
                mode: spec.mode,
                records: junior
                    .iter()
                    .filter(|record| (spec.predicate)(record))
                    .cloned()
                    .collect(),
            })
            .collect();

        let tables = sections
            .iter()
            .map(|section| (section.name.to_string(), self.section_table(section)))
            .collect();

        let mut export = Table::new(EXPORT_HEADERS);
        for record in sections.iter().flat_map(|s| &s.records) {
            export.push_row(EXPORT_COLUMNS.iter().map(|c| c.value(record)).collect());
        }

        let period = Period::of(self.generated_at);
        let message = self.render(period, &sections);

        Report {
            generated_at: self.generated_at,
            period,
            message,
            sections,
            tables,
            export,
        }
    }

    fn section_table(&self, section: &Section) -> Table {
        let mut table = Table::new(
            SECTION_COLUMNS
                .iter()
                .map(|c| c.name())
                .chain(std::iter::once("requirements")),
        );
        for record in &section.records {
            let mut row: Vec<String> = SECTION_COLUMNS.iter().map(|c| c.value(record)).collect();
            row.push(self.extractor.extract(&record.description).join("; "));
            table.push_row(row);
        }
        table
    }

    fn render(&self, period: Period, sections: &[Section]) -> String {
        let mut text = format!(
            "📅 Vagas atualizadas dia: *{}*\nPeríodo: *{}*\n\n",
            self.generated_at.format("%d/%m/%Y"),
            period.label()
        );

        for section in sections.iter().filter(|s| !s.records.is_empty()) {
            text.push_str(&format!("*{}*\n", section.title));
            for record in &section.records {
                text.push_str(&format!("🏢 {}\n", escape_markdown(&record.career_page_name)));
                if section.mode == RenderMode::WithLocation {
                    text.push_str(&format!(
                        "📍 Local: {} \\- {}\n",
                        escape_markdown(&record.city),
                        escape_markdown(&record.state)
                    ));
                }
                text.push_str(&format!(
                    "🔗 [{}]({})\n\n",
                    escape_markdown(&record.title),
                    escape_link_target(&record.url)
                ));
            }
        }

        text.push('\n');
        text.push_str(&self.footer);
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .and_then(|d| d.and_hms_opt(hour, 30, 0))
            .expect("timestamp")
    }

    fn job(id: &str, title: &str, remote: bool, workplace: &str, state: &str) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            published_date: "2024-01-02T10:00:00.000Z".to_string(),
            title: title.to_string(),
            career_page_name: format!("Empresa {id}"),
            is_remote_work: remote,
            city: format!("Cidade {id}"),
            state: state.to_string(),
            url: format!("https://empresa{id}.example/jobs/{id}"),
            workplace_type: workplace.to_string(),
            ..Default::default()
        }
    }

    /// True when every reserved char in `text` is preceded by a backslash.
    fn fully_escaped(text: &str) -> bool {
        let mut prev = None;
        for ch in text.chars() {
            if RESERVED_CHARS.contains(&ch) && prev != Some('\\') {
                return false;
            }
            prev = Some(ch);
        }
        true
    }

    #[test]
    fn escape_prefixes_each_reserved_char_once() {
        assert_eq!(escape_markdown("A&B (Tech)"), "A&B \\(Tech\\)");
        assert_eq!(escape_markdown("v1.0-rc!"), "v1\\.0\\-rc\\!");
        assert_eq!(escape_markdown("a\\b"), "a\\b");
        let all: String = RESERVED_CHARS.iter().collect();
        let escaped = escape_markdown(&all);
        assert_eq!(escaped.chars().count(), RESERVED_CHARS.len() * 2);
        assert!(fully_escaped(&escaped));
    }

    #[test]
    fn seniority_exclusion_is_substring_based() {
        assert!(!is_junior_eligible("Senior Data Analyst"));
        assert!(!is_junior_eligible("Analista Sênior"));
        assert!(!is_junior_eligible("Desenvolvedor Pleno"));
        assert!(!is_junior_eligible("Dev Sr."));
        // "PL" inside a longer word still excludes the title.
        assert!(!is_junior_eligible("PLataforma Jr"));
        assert!(!is_junior_eligible("Analista de Suporte Plataforma"));
        assert!(is_junior_eligible("Analista de Dados Jr"));
        assert!(is_junior_eligible("Estagiário de Dados"));
    }

    #[test]
    fn requirements_between_markers_are_split() {
        let extractor = RequirementsExtractor::default();
        assert_eq!(
            extractor.extract(
                "Intro. Requirements and qualifications SQL; Python ;Excel Additional information Benefits"
            ),
            vec!["SQL", "Python", "Excel"]
        );
        assert_eq!(
            extractor.extract("Requisitos e qualificações Git;Linux Informações adicionais"),
            vec!["Git", "Linux"]
        );
    }

    #[test]
    fn requirements_missing_markers_yield_empty() {
        let extractor = RequirementsExtractor::default();
        assert!(extractor
            .extract("Requirements and qualifications SQL; Python")
            .is_empty());
        assert!(extractor.extract("Additional information only").is_empty());
        assert!(extractor.extract("").is_empty());
    }

    #[test]
    fn period_switches_at_noon() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).expect("date");
        let before = day.and_hms_opt(11, 59, 59).expect("time");
        let noon = day.and_hms_opt(12, 0, 0).expect("time");

        assert_eq!(Period::of(before), Period::Morning);
        assert_eq!(Period::of(noon), Period::Afternoon);
        assert!(ReportBuilder::new(noon)
            .build(&[])
            .message
            .contains(Period::Afternoon.label()));
    }

    #[test]
    fn remote_and_hybrid_membership_is_independent() {
        let records = vec![
            job("1", "Analista Jr", true, "hybrid", "SP"),
            job("2", "Estágio", true, "remote", "RJ"),
            job("3", "Trainee", false, "hybrid", "MG"),
            job("4", "Assistente", false, "on-site", "BA"),
        ];
        let report = ReportBuilder::new(at(9)).build(&records);

        let ids = |name: &str| -> Vec<String> {
            report
                .section(name)
                .expect("section")
                .records
                .iter()
                .map(|r| r.id.clone())
                .collect()
        };
        assert_eq!(ids("remote"), vec!["2", "1"]);
        assert_eq!(ids("hybrid"), vec!["3", "1"]);
        assert_eq!(report.export.len(), 4);
        assert_eq!(report.tables["remote"].len(), 2);
    }

    #[test]
    fn sections_sorted_by_state_then_city() {
        let mut a = job("1", "Jr A", true, "remote", "SP");
        a.city = "Santos".into();
        let mut b = job("2", "Jr B", true, "remote", "SP");
        b.city = "Campinas".into();
        let c = job("3", "Jr C", true, "remote", "AM");
        let report = ReportBuilder::new(at(9)).build(&[a, b, c]);
        let order: Vec<_> = report.sections[0]
            .records
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(order, vec!["3", "2", "1"]);
    }

    #[test]
    fn message_escapes_interpolated_fields_only() {
        let mut record = job("1", "Dev Jr (Python)", false, "hybrid", "São Paulo");
        record.career_page_name = "A&B (Tech)".into();
        record.city = "Ribeirão-Preto".into();
        let report = ReportBuilder::new(at(15)).build(&[record]);
        let msg = &report.message;

        assert!(msg.contains("🏢 A&B \\(Tech\\)\n"));
        assert!(msg.contains("📍 Local: Ribeirão\\-Preto \\- São Paulo\n"));
        assert!(msg.contains("🔗 [Dev Jr \\(Python\\)](https://empresa1.example/jobs/1)\n"));
        assert!(msg.contains("*🌍 Vagas Jr \\- Híbridas 🌍*\n"));
        assert!(msg.starts_with("📅 Vagas atualizadas dia: *02/01/2024*\nPeríodo: *Tarde 🌇*\n"));
        assert!(msg.ends_with(DEFAULT_FOOTER));
        assert_eq!(msg.matches("Gostou do projeto?").count(), 1);
    }

    #[test]
    fn escaped_fields_leave_no_bare_reserved_chars() {
        let title = "Eng. [Dados] {BI} #1 *novo* _x_ ~y~ `z` a>b a<b a=b a|b a+b!";
        let mut record = job("9", title, true, "remote", "SP");
        record.career_page_name = "Corp.-(Sul)".into();
        let report = ReportBuilder::new(at(8)).build(&[record.clone()]);
        assert!(fully_escaped(&escape_markdown(&record.title)));
        assert!(report.message.contains(&escape_markdown(&record.title)));
        assert!(report.message.contains(&escape_markdown(&record.career_page_name)));
    }

    #[test]
    fn empty_sections_are_omitted() {
        let report =
            ReportBuilder::new(at(8)).build(&[job("1", "Analista Jr", true, "remote", "SP")]);
        assert!(report.message.contains("Remotas"));
        assert!(!report.message.contains("Híbridas"));
        assert!(!report.message.contains("📍"));
        assert!(report.message.contains("Período: *Manhã 🌅*"));
        assert!(report.tables["hybrid"].is_empty());
    }

    #[test]
    fn senior_titles_never_reach_sections() {
        let report = ReportBuilder::new(at(8)).build(&[
            job("1", "Senior Data Analyst", true, "hybrid", "SP"),
            job("2", "PLataforma Jr", true, "remote", "SP"),
        ]);
        assert!(report.sections.iter().all(|s| s.records.is_empty()));
        assert!(report.export.is_empty());
        assert!(!report.message.contains("🏢"));
    }

    #[test]
    fn custom_sections_and_footer() {
        let report = ReportBuilder::new(at(8))
            .with_sections(vec![SectionSpec::hybrid()])
            .with_footer("fim")
            .build(&[
                job("1", "Analista Jr", true, "remote", "SP"),
                job("2", "Trainee", false, "hybrid", "RJ"),
            ]);
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.export.len(), 1);
        assert!(!report.message.contains("Remotas"));
        assert!(report.message.ends_with("\nfim"));
    }

    #[test]
    fn export_uses_readable_headers_and_section_order() {
        let mut record = job("1", "Analista Jr", true, "hybrid", "SP");
        record.description =
            "Requisitos e qualificações SQL;Excel Informações adicionais".into();
        let report = ReportBuilder::new(at(8)).build(&[record]);

        assert_eq!(report.export.headers, EXPORT_HEADERS);
        assert_eq!(report.export.len(), 2);
        assert_eq!(
            report.export.rows[0],
            vec![
                "2024-01-02T10:00:00.000Z",
                "Analista Jr",
                "Empresa 1",
                "hybrid",
                "https://empresa1.example/jobs/1",
                "Cidade 1",
                "SP",
            ]
        );
        assert_eq!(
            report.tables["hybrid"].column("requirements"),
            Some(vec!["SQL; Excel"])
        );
    }
}
