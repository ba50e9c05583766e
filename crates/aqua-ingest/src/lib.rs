//! Record normalization: sectioned CSV exports into typed, grouped records.
//!
//! Both source files are Excel exports with section headers rather than one
//! uniform table. The quality file opens each parameter block with a
//! `Safe Range:` line; the flow file opens each location block with a
//! `Location Name:` line. Everything that reaches the store goes through the
//! validation here first.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use aqua_core::{FlowRecord, Location, Parameter, QualityRecord, ValidationError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CRATE_NAME: &str = "aqua-ingest";

const DATE_TIME_FORMATS: [&str; 4] = [
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

/// Declarative label-to-parameter alias table. Canonical schema names always
/// resolve; aliases cover the spacing and prefix variants seen in exports.
#[derive(Debug, Clone)]
pub struct LabelMap {
    aliases: BTreeMap<String, Parameter>,
}

#[derive(Debug, Deserialize)]
struct LabelMapFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    aliases: Vec<LabelAlias>,
}

#[derive(Debug, Deserialize)]
struct LabelAlias {
    label: String,
    parameter: String,
}

impl Default for LabelMap {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LabelMap {
    /// Variants observed in the plant exports.
    pub fn builtin() -> Self {
        let mut aliases = BTreeMap::new();
        for (label, parameter) in [
            ("ETP TDS", Parameter::EtpTds),
            ("ETP pH", Parameter::EtpPh),
            ("STP TDS", Parameter::StpTds),
            ("STP TSS", Parameter::StpTss),
            ("STP BOD", Parameter::StpBod),
            ("STP pH", Parameter::StpPh),
            ("STP COD", Parameter::StpCod),
        ] {
            aliases.insert(label.to_string(), parameter);
        }
        Self { aliases }
    }

    /// Builtin aliases extended with a YAML table. Every target must name a
    /// known parameter; a bad entry fails the load instead of silently
    /// mapping readings to nothing.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: LabelMapFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

        let mut map = Self::builtin();
        for alias in file.aliases {
            let parameter = Parameter::from_name(&alias.parameter).with_context(|| {
                format!(
                    "alias {:?} in {} targets unknown parameter {:?}",
                    alias.label,
                    path.display(),
                    alias.parameter
                )
            })?;
            map.aliases.insert(alias.label, parameter);
        }
        Ok(map)
    }

    fn resolve(&self, cleaned: &str) -> Option<Parameter> {
        Parameter::from_name(cleaned)
            .ok()
            .or_else(|| self.aliases.get(cleaned).copied())
    }
}

/// Per-file outcome counters, reported alongside the grouped records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    pub rows_kept: usize,
    pub unknown_labels: usize,
    pub skipped_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct QualityIngest {
    pub groups: BTreeMap<Parameter, Vec<QualityRecord>>,
    pub summary: ParseSummary,
}

#[derive(Debug, Clone, Default)]
pub struct FlowIngest {
    pub groups: BTreeMap<Location, Vec<FlowRecord>>,
    pub summary: ParseSummary,
}

/// Normalize a raw section label to a known parameter.
///
/// Mirrors the export quirks: list numbering (`1. `), trailing commas, a
/// `Safe Range:` tail, stray punctuation, and missing space before `(`.
pub fn normalize_parameter_label(
    raw: &str,
    labels: &LabelMap,
) -> Result<Parameter, ValidationError> {
    let cleaned = clean_label(raw);
    labels
        .resolve(&cleaned)
        .ok_or_else(|| ValidationError::UnknownParameter(raw.trim().to_string()))
}

fn clean_label(raw: &str) -> String {
    let mut label = raw.trim();
    if let Some(idx) = label.find("Safe Range:") {
        label = label[..idx].trim();
    }
    label = label.trim_end_matches(',').trim();

    // "1. STP (TDS)" -> "STP (TDS)"
    let digits = label.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 && label[digits..].starts_with('.') {
        label = label[digits + 1..].trim_start();
    }

    let kept: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '(' || c == ')' {
                c
            } else {
                ' '
            }
        })
        .collect();

    // Force one space before '(' so "ETP(TDS)" folds onto "ETP (TDS)".
    let spaced = kept.replace('(', " (");
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a `Date` + `Time` cell pair, day-first, into a UTC instant.
pub fn parse_timestamp(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let joined = format!("{} {}", date.trim(), time.trim());
    DATE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&joined, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_safe_range(tail: &str) -> Option<(f64, f64)> {
    let trimmed = tail.trim().trim_matches(|c| c == '(' || c == ')' || c == ' ');
    let (lo, hi) = trimmed.split_once("to")?;
    Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?))
}

fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

/// Parse the water-quality export. Rows under an unrecognized section are
/// never stored; every skip is counted.
pub fn parse_quality_csv(text: &str, labels: &LabelMap) -> QualityIngest {
    let mut out = QualityIngest::default();
    let mut current: Option<Parameter> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        if let Some(idx) = line.find("Safe Range:") {
            match normalize_parameter_label(&line[..idx], labels) {
                Ok(parameter) => {
                    if let Some(range) = parse_safe_range(&line[idx + "Safe Range:".len()..]) {
                        if range != parameter.safe_range() {
                            warn!(
                                parameter = %parameter,
                                header_min = range.0,
                                header_max = range.1,
                                "section header range disagrees with seeded bounds"
                            );
                        }
                    }
                    current = Some(parameter);
                }
                Err(err) => {
                    warn!(%err, "skipping unrecognized parameter section");
                    out.summary.unknown_labels += 1;
                    current = None;
                }
            }
            continue;
        }

        let lower = line.to_ascii_lowercase();
        if lower.contains("date") || lower.contains("time") || lower.contains("parameter") {
            continue;
        }

        let Some(parameter) = current else {
            out.summary.skipped_rows += 1;
            continue;
        };
        let fields = split_fields(line);
        if fields.len() < 3 {
            out.summary.skipped_rows += 1;
            continue;
        }
        let Some(timestamp) = parse_timestamp(&fields[0], &fields[1]) else {
            out.summary.skipped_rows += 1;
            continue;
        };
        let Ok(value) = fields[2].parse::<f64>() else {
            out.summary.skipped_rows += 1;
            continue;
        };

        match QualityRecord::new(timestamp, parameter, value) {
            Ok(record) => {
                out.groups.entry(parameter).or_default().push(record);
                out.summary.rows_kept += 1;
            }
            Err(err) => {
                warn!(%err, "dropping invalid quality row");
                out.summary.skipped_rows += 1;
            }
        }
    }

    out
}

/// Parse the flow export. Groups are sorted by timestamp once collected;
/// `########` date cells (Excel column overflow) are skipped.
pub fn parse_flow_csv(text: &str) -> FlowIngest {
    let mut out = FlowIngest::default();
    let mut current: Option<Location> = None;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        let fields = split_fields(line);
        let col_a = fields.first().map(String::as_str).unwrap_or_default();

        if let Some(name) = col_a.strip_prefix("Location Name:") {
            match Location::from_name(name.trim()) {
                Ok(location) => current = Some(location),
                Err(err) => {
                    warn!(%err, "skipping unrecognized location section");
                    out.summary.unknown_labels += 1;
                    current = None;
                }
            }
            continue;
        }

        if col_a.eq_ignore_ascii_case("date") {
            continue;
        }
        if fields.iter().all(|f| f.is_empty()) {
            continue;
        }

        let Some(location) = current else {
            out.summary.skipped_rows += 1;
            continue;
        };
        if col_a == "########" || fields.len() < 3 {
            out.summary.skipped_rows += 1;
            continue;
        }
        let Some(timestamp) = parse_timestamp(&fields[0], &fields[1]) else {
            out.summary.skipped_rows += 1;
            continue;
        };
        let Ok(totalizer) = fields[2].parse::<f64>() else {
            out.summary.skipped_rows += 1;
            continue;
        };

        match FlowRecord::new(timestamp, location, totalizer) {
            Ok(record) => {
                out.groups.entry(location).or_default().push(record);
                out.summary.rows_kept += 1;
            }
            Err(err) => {
                warn!(%err, "dropping invalid flow row");
                out.summary.skipped_rows += 1;
            }
        }
    }

    for records in out.groups.values_mut() {
        records.sort_by_key(|r| r.timestamp);
    }
    out
}

pub fn read_quality_file(path: impl AsRef<Path>, labels: &LabelMap) -> Result<QualityIngest> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_quality_csv(&text, labels))
}

pub fn read_flow_file(path: impl AsRef<Path>) -> Result<FlowIngest> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_flow_csv(&text))
}
