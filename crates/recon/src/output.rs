//! Output table: one row per record with `{field}_final`, `{field}_source`
//! and `{field}_confidence` columns for every reconciled field.

use std::collections::BTreeMap;
use std::io::{BufRead, Read, Write};

use serde_json::{Map, Value};

use crate::error::ReconError;
use crate::model::{Confidence, ConsensusDecision, RecordId};

const FINAL_SUFFIX: &str = "_final";
const SOURCE_SUFFIX: &str = "_source";
const CONFIDENCE_SUFFIX: &str = "_confidence";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Jsonl,
}

impl TableFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "jsonl" | "json" => Some(Self::Jsonl),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        }
    }
}

/// Final value, source and confidence of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOutcome {
    pub value: Option<String>,
    pub source: Option<String>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRow {
    pub record_id: RecordId,
    pub fields: BTreeMap<String, FieldOutcome>,
}

impl OutputRow {
    pub fn new(record_id: RecordId) -> Self {
        Self {
            record_id,
            fields: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, decision: &ConsensusDecision) {
        self.fields.insert(
            decision.field.clone(),
            FieldOutcome {
                value: decision.chosen_value.clone(),
                source: decision.source_method.clone(),
                confidence: decision.confidence,
            },
        );
    }

    /// Rebuild the decision for one field.
    pub fn decision(&self, field: &str) -> Option<ConsensusDecision> {
        self.fields.get(field).map(|o| ConsensusDecision {
            record_id: self.record_id.clone(),
            field: field.to_string(),
            chosen_value: o.value.clone(),
            source_method: o.source.clone(),
            confidence: o.confidence,
        })
    }
}

/// Group decisions into rows, ordered by record id.
pub fn rows_from_decisions<'a, I>(decisions: I) -> Vec<OutputRow>
where
    I: IntoIterator<Item = &'a ConsensusDecision>,
{
    let mut rows: BTreeMap<RecordId, OutputRow> = BTreeMap::new();
    for d in decisions {
        rows.entry(d.record_id.clone())
            .or_insert_with(|| OutputRow::new(d.record_id.clone()))
            .set(d);
    }
    rows.into_values().collect()
}

fn header(fields: &[String]) -> Vec<String> {
    let mut cols = vec!["record_id".to_string()];
    for f in fields {
        cols.push(format!("{f}{FINAL_SUFFIX}"));
        cols.push(format!("{f}{SOURCE_SUFFIX}"));
        cols.push(format!("{f}{CONFIDENCE_SUFFIX}"));
    }
    cols
}

/// Write rows. `fields` fixes the column order; a field missing from a row is
/// written as unresolved.
pub fn write_rows<W: Write>(
    out: W,
    rows: &[OutputRow],
    fields: &[String],
    format: TableFormat,
) -> Result<(), ReconError> {
    match format {
        TableFormat::Csv => write_csv(out, rows, fields),
        TableFormat::Jsonl => write_jsonl(out, rows, fields),
    }
}

fn cells<'a>(row: &'a OutputRow, field: &str) -> (Option<&'a str>, Option<&'a str>, Confidence) {
    match row.fields.get(field) {
        Some(o) => (o.value.as_deref(), o.source.as_deref(), o.confidence),
        None => (None, None, Confidence::Unresolved),
    }
}

fn write_csv<W: Write>(out: W, rows: &[OutputRow], fields: &[String]) -> Result<(), ReconError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(header(fields))?;
    for row in rows {
        let mut record = vec![row.record_id.to_string()];
        for f in fields {
            let (value, source, confidence) = cells(row, f);
            record.push(value.unwrap_or_default().to_string());
            record.push(source.unwrap_or_default().to_string());
            record.push(confidence.to_string());
        }
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_jsonl<W: Write>(mut out: W, rows: &[OutputRow], fields: &[String]) -> Result<(), ReconError> {
    for row in rows {
        let mut obj = Map::new();
        obj.insert("record_id".into(), Value::String(row.record_id.to_string()));
        for f in fields {
            let (value, source, confidence) = cells(row, f);
            let opt = |s: Option<&str>| s.map_or(Value::Null, |s| Value::String(s.to_string()));
            obj.insert(format!("{f}{FINAL_SUFFIX}"), opt(value));
            obj.insert(format!("{f}{SOURCE_SUFFIX}"), opt(source));
            obj.insert(format!("{f}{CONFIDENCE_SUFFIX}"), Value::String(confidence.to_string()));
        }
        writeln!(out, "{}", Value::Object(obj))?;
    }
    out.flush()?;
    Ok(())
}

// ============================================================================
// Parsing
// ============================================================================

/// Read a table written by [`write_rows`].
pub fn parse_rows<R: Read>(input: R, format: TableFormat) -> Result<Vec<OutputRow>, ReconError> {
    match format {
        TableFormat::Csv => parse_csv(input),
        TableFormat::Jsonl => parse_jsonl(input),
    }
}

enum Column {
    Final,
    Source,
    Confidence,
}

fn split_column(name: &str) -> Option<(&str, Column)> {
    if let Some(f) = name.strip_suffix(FINAL_SUFFIX) {
        Some((f, Column::Final))
    } else if let Some(f) = name.strip_suffix(CONFIDENCE_SUFFIX) {
        Some((f, Column::Confidence))
    } else {
        name.strip_suffix(SOURCE_SUFFIX).map(|f| (f, Column::Source))
    }
}

/// Accumulates the three columns of each field for one row.
struct RowBuilder {
    line: usize,
    record_id: Option<RecordId>,
    partial: BTreeMap<String, (Option<String>, Option<String>, Option<String>)>,
}

impl RowBuilder {
    fn new(line: usize) -> Self {
        Self {
            line,
            record_id: None,
            partial: BTreeMap::new(),
        }
    }

    fn put(&mut self, column: &str, value: Option<String>) {
        if column == "record_id" {
            self.record_id = value.map(RecordId::new);
            return;
        }
        let Some((field, kind)) = split_column(column) else {
            return;
        };
        let slot = self.partial.entry(field.to_string()).or_default();
        match kind {
            Column::Final => slot.0 = value,
            Column::Source => slot.1 = value,
            Column::Confidence => slot.2 = value,
        }
    }

    fn finish(self) -> Result<OutputRow, ReconError> {
        let line = self.line;
        let record_id = self.record_id.ok_or_else(|| ReconError::InputParse {
            line,
            message: "missing record_id".into(),
        })?;
        let mut row = OutputRow::new(record_id);
        for (field, (value, source, confidence)) in self.partial {
            let raw = confidence.unwrap_or_default();
            let confidence = Confidence::parse(&raw).ok_or_else(|| ReconError::InputParse {
                line,
                message: format!("field '{field}': unknown confidence '{raw}'"),
            })?;
            row.fields.insert(field, FieldOutcome { value, source, confidence });
        }
        Ok(row)
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_csv<R: Read>(input: R) -> Result<Vec<OutputRow>, ReconError> {
    let mut rdr = csv::Reader::from_reader(input);
    let headers = rdr.headers()?.clone();
    let mut rows = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let mut builder = RowBuilder::new(i + 2);
        for (name, cell) in headers.iter().zip(record.iter()) {
            builder.put(name, non_empty(cell));
        }
        rows.push(builder.finish()?);
    }
    Ok(rows)
}

fn parse_jsonl<R: Read>(input: R) -> Result<Vec<OutputRow>, ReconError> {
    let reader = std::io::BufReader::new(input);
    let mut rows = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line).map_err(|e| ReconError::InputParse {
            line: i + 1,
            message: e.to_string(),
        })?;
        let Value::Object(obj) = value else {
            return Err(ReconError::InputParse {
                line: i + 1,
                message: "expected a JSON object".into(),
            });
        };
        let mut builder = RowBuilder::new(i + 1);
        for (name, cell) in obj {
            let cell = match cell {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            };
            builder.put(&name, cell);
        }
        rows.push(builder.finish()?);
    }
    Ok(rows)
}
