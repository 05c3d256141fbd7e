use crate::config::DebtorsConfig;
use crate::error::{DebtorsError, Result};
use crate::utils::{PeriodKey, PeriodType};
use chrono::{Days, NaiveDate};
use csv::ReaderBuilder;
use log::{debug, info};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::str::FromStr;

/// Days between the spreadsheet epoch (1899-12-30) and 1970-01-01.
const SERIAL_DATE_UNIX_OFFSET: i64 = 25569;

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d/%m/%y",
];

const SUMMARY_KEYWORDS: [&str; 6] = ["total", "totales", "subtotal", "suma", "resumen", "summary"];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(Decimal),
}

impl Cell {
    /// Classifies a raw textual cell, recognising numbers written with
    /// either decimal separator.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match parse_decimal(trimmed) {
            Some(value) => Cell::Number(value),
            None => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
            Cell::Number(value) => Some(value.normalize().to_string()),
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => parse_decimal(text),
            Cell::Number(value) => Some(*value),
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Cell::Text(text) if !text.trim().is_empty())
    }
}

impl From<&str> for Cell {
    fn from(raw: &str) -> Self {
        if raw.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(raw.to_string())
        }
    }
}

impl From<Decimal> for Cell {
    fn from(value: Decimal) -> Self {
        Cell::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(Decimal::from(value))
    }
}

/// Normalised fields a spreadsheet column can be mapped to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetField {
    #[serde(rename = "fechaAlbaran")]
    InvoiceDate,
    #[serde(rename = "clienteNombre")]
    ClientName,
    #[serde(rename = "totalImporte")]
    TotalAmount,
    #[serde(rename = "cobradoLinea")]
    AmountCollected,
    #[serde(rename = "deuda")]
    Debt,
    #[serde(rename = "paciente")]
    PatientName,
    #[serde(rename = "etiqueta")]
    Label,
}

/// Header patterns per field, highest priority first.
const FIELD_PATTERNS: [(TargetField, &[&str]); 7] = [
    (TargetField::InvoiceDate, &["fecha albar", "fecha", "date"]),
    (TargetField::ClientName, &["cliente", "nombre", "client", "titular"]),
    (TargetField::TotalAmount, &["total", "importe", "amount"]),
    (TargetField::AmountCollected, &["cobrado", "pagado", "collected"]),
    (TargetField::Debt, &["deuda", "pendiente", "debt"]),
    (TargetField::PatientName, &["paciente", "mascota", "patient"]),
    (TargetField::Label, &["etiqueta", "label"]),
];

pub type ColumnMapping = BTreeMap<TargetField, String>;

/// Maps each target field to the first header matching its patterns.
/// Patterns are tried in priority order, headers in column order, and
/// matching is a case-insensitive substring test.
pub fn detect_column_mapping<S: AsRef<str>>(headers: &[S]) -> ColumnMapping {
    let lowered: Vec<String> = headers
        .iter()
        .map(|h| h.as_ref().trim().to_lowercase())
        .collect();

    let mut mapping = ColumnMapping::new();
    for (field, patterns) in FIELD_PATTERNS {
        let found = patterns.iter().find_map(|pattern| {
            lowered
                .iter()
                .position(|header| header.contains(pattern))
        });
        if let Some(index) = found {
            mapping.insert(field, headers[index].as_ref().trim().to_string());
        }
    }
    mapping
}

fn has_summary_keyword(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| SUMMARY_KEYWORDS.contains(&word))
}

/// Heuristic for total/subtotal lines: a summary keyword in any text cell,
/// a number above `threshold`, or a row made only of numbers with at least
/// one positive value.
pub fn is_summary_row(row: &[Cell], threshold: Decimal) -> bool {
    let mut text_cells = 0;
    let mut positive_numbers = 0;

    for cell in row {
        if let Some(value) = cell.as_number() {
            if value > threshold {
                return true;
            }
            if value > Decimal::ZERO {
                positive_numbers += 1;
            }
        } else if let Cell::Text(text) = cell {
            if has_summary_keyword(text) {
                return true;
            }
            if cell.is_text() {
                text_cells += 1;
            }
        }
    }

    text_cells == 0 && positive_numbers > 0
}

/// True when every group after the first has exactly three digits, as in
/// `1.234.567`.
fn is_thousands_grouped(raw: &str, separator: char) -> bool {
    let mut groups = raw.trim_start_matches(['-', '+']).split(separator);
    let leading_ok = groups
        .next()
        .is_some_and(|g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()));
    leading_ok && groups.all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()))
}

/// Parses `1.234,56`, `1,234.56`, `120,50` or `€ 75`. Repeated separators
/// of a single kind are accepted only as thousands grouping, so
/// `05.03.2024` is not a number.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '€' | '$' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let commas = cleaned.matches(',').count();
    let dots = cleaned.matches('.').count();
    let normalized = match (commas, dots) {
        (0, 0) => cleaned,
        (_, 0) if commas == 1 => cleaned.replace(',', "."),
        (_, 0) if is_thousands_grouped(&cleaned, ',') => cleaned.replace(',', ""),
        (_, 0) => return None,
        (0, _) if dots == 1 => cleaned,
        (0, _) if is_thousands_grouped(&cleaned, '.') => cleaned.replace('.', ""),
        (0, _) => return None,
        _ => {
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_dot = cleaned.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                cleaned.replace('.', "").replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
    };

    Decimal::from_str(&normalized).ok()
}

/// Converts a spreadsheet serial day number or a date string.
pub fn parse_date_cell(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Empty => None,
        Cell::Number(serial) => serial_to_date(*serial),
        Cell::Text(text) => {
            let text = text.trim();
            let date_part = text.split(['T', ' ']).next().unwrap_or(text);
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
                .or_else(|| parse_decimal(text).and_then(serial_to_date))
        }
    }
}

fn serial_to_date(serial: Decimal) -> Option<NaiveDate> {
    let serial = serial.trunc().to_i64()?;
    if serial <= 0 {
        return None;
    }
    let unix_epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    let offset = serial - SERIAL_DATE_UNIX_OFFSET;
    if offset >= 0 {
        unix_epoch.checked_add_days(Days::new(offset as u64))
    } else {
        unix_epoch.checked_sub_days(Days::new(offset.unsigned_abs()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadsheetRow {
    pub id: String,
    #[serde(rename = "fechaAlbaran")]
    pub invoice_date: Option<NaiveDate>,
    #[serde(rename = "clienteNombre")]
    pub client_name: String,
    #[serde(rename = "totalImporte")]
    pub total_amount: Decimal,
    #[serde(rename = "cobradoLinea")]
    pub amount_collected: Decimal,
    #[serde(rename = "deuda")]
    pub debt: Decimal,
    #[serde(rename = "paciente")]
    pub patient_name: Option<String>,
    #[serde(rename = "etiqueta")]
    pub label: Option<String>,
}

/// Turns raw sheet rows into [`SpreadsheetRow`]s.
#[derive(Debug, Clone)]
pub struct SpreadsheetParser {
    summary_row_threshold: Decimal,
}

impl Default for SpreadsheetParser {
    fn default() -> Self {
        Self::new(&DebtorsConfig::default())
    }
}

impl SpreadsheetParser {
    pub fn new(config: &DebtorsConfig) -> Self {
        Self {
            summary_row_threshold: config.summary_row_threshold,
        }
    }

    /// The first row is the header. Summary rows and rows with neither a
    /// client name nor a positive total are skipped.
    pub fn parse(&self, file_name: &str, rows: &[Vec<Cell>]) -> Result<Vec<SpreadsheetRow>> {
        let ingestion_error = |details: &str| DebtorsError::Ingestion {
            file: file_name.to_string(),
            details: details.to_string(),
        };

        let (header, body) = rows
            .split_first()
            .ok_or_else(|| ingestion_error("missing header row"))?;
        let headers: Vec<String> = header
            .iter()
            .map(|cell| cell.as_text().unwrap_or_default())
            .collect();

        let mapping = detect_column_mapping(&headers);
        if !mapping.contains_key(&TargetField::ClientName)
            && !mapping.contains_key(&TargetField::TotalAmount)
        {
            return Err(ingestion_error("no client or total column found in header"));
        }
        debug!("Column mapping for {}: {:?}", file_name, mapping);

        let columns: BTreeMap<TargetField, usize> = mapping
            .keys()
            .filter_map(|field| {
                headers
                    .iter()
                    .position(|h| h.trim() == mapping[field])
                    .map(|index| (*field, index))
            })
            .collect();

        let cell = |row: &[Cell], field: TargetField| -> Option<Cell> {
            columns.get(&field).and_then(|&index| row.get(index)).cloned()
        };
        let number = |row: &[Cell], field: TargetField| {
            cell(row, field)
                .and_then(|c| c.as_number())
                .unwrap_or(Decimal::ZERO)
        };
        let text = |row: &[Cell], field: TargetField| cell(row, field).and_then(|c| c.as_text());

        let mut parsed = Vec::new();
        let mut summaries = 0;

        for (index, row) in body.iter().enumerate() {
            if row.iter().all(|c| *c == Cell::Empty) {
                continue;
            }
            if is_summary_row(row, self.summary_row_threshold) {
                summaries += 1;
                continue;
            }

            let client_name = text(row, TargetField::ClientName).unwrap_or_default();
            let total_amount = number(row, TargetField::TotalAmount);
            if client_name.is_empty() && total_amount <= Decimal::ZERO {
                continue;
            }

            let amount_collected = number(row, TargetField::AmountCollected);
            let debt = if columns.contains_key(&TargetField::Debt) {
                number(row, TargetField::Debt)
            } else {
                (total_amount - amount_collected).max(Decimal::ZERO)
            };

            parsed.push(SpreadsheetRow {
                id: format!("row-{}", index + 2),
                invoice_date: cell(row, TargetField::InvoiceDate)
                    .as_ref()
                    .and_then(parse_date_cell),
                client_name,
                total_amount,
                amount_collected,
                debt,
                patient_name: text(row, TargetField::PatientName),
                label: text(row, TargetField::Label),
            });
        }

        info!(
            "Parsed {} rows from {} ({} summary rows skipped)",
            parsed.len(),
            file_name,
            summaries
        );
        Ok(parsed)
    }
}

/// [`SpreadsheetParser::parse`] with default thresholds.
pub fn parse_workbook(rows: &[Vec<Cell>]) -> Result<Vec<SpreadsheetRow>> {
    SpreadsheetParser::default().parse("workbook", rows)
}

/// Reads a delimited export into cells. The delimiter (`;`, tab or `,`) is
/// guessed from the header line.
pub fn read_csv_rows<R: Read>(mut reader: R) -> Result<Vec<Vec<Cell>>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let content = content.trim_start_matches('\u{feff}');

    let header_line = content.lines().next().unwrap_or_default();
    let delimiter = [b';', b'\t', b',']
        .into_iter()
        .max_by_key(|d| header_line.matches(*d as char).count())
        .unwrap_or(b',');

    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(Cell::from_raw).collect());
    }
    Ok(rows)
}

/// A client whose label should propagate onto ingested rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnownClient {
    pub name: String,
    pub label: Option<String>,
}

/// Overwrites blank or stale row labels with the label of the matching known
/// client. Returns how many rows changed.
pub fn reconcile_labels(rows: &mut [SpreadsheetRow], known_clients: &[KnownClient]) -> usize {
    let labels: BTreeMap<String, &str> = known_clients
        .iter()
        .filter_map(|client| {
            let label = client.label.as_deref().map(str::trim).filter(|l| !l.is_empty())?;
            Some((client.name.trim().to_lowercase(), label))
        })
        .collect();

    let mut changed = 0;
    for row in rows.iter_mut() {
        let Some(label) = labels.get(&row.client_name.trim().to_lowercase()) else {
            continue;
        };
        if row.label.as_deref().map(str::trim) != Some(*label) {
            row.label = Some(label.to_string());
            changed += 1;
        }
    }
    changed
}

/// Body of `POST /debtors/deudas/procesar-excel-comparativa`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpreadsheetBatch {
    #[serde(rename = "periodo")]
    pub period: PeriodKey,
    #[serde(rename = "tipo")]
    pub period_type: PeriodType,
    #[serde(rename = "archivos")]
    pub files: Vec<String>,
    #[serde(rename = "registros")]
    pub rows: Vec<SpreadsheetRow>,
}

/// Rows accumulated from one or more uploaded files, pending submission.
#[derive(Debug, Clone, Default)]
pub struct IngestedBatch {
    parser: SpreadsheetParser,
    files: Vec<String>,
    rows: Vec<SpreadsheetRow>,
}

impl IngestedBatch {
    pub fn new(config: &DebtorsConfig) -> Self {
        Self {
            parser: SpreadsheetParser::new(config),
            files: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Parses one file's rows. A failure leaves the batch untouched.
    pub fn ingest_rows(&mut self, file_name: &str, rows: &[Vec<Cell>]) -> Result<usize> {
        let parsed = self.parser.parse(file_name, rows)?;
        let count = parsed.len();
        self.files.push(file_name.to_string());
        self.rows.extend(parsed.into_iter().map(|mut row| {
            row.id = format!("{}:{}", file_name, row.id);
            row
        }));
        Ok(count)
    }

    pub fn ingest_csv<R: Read>(&mut self, file_name: &str, reader: R) -> Result<usize> {
        let rows = read_csv_rows(reader).map_err(|e| DebtorsError::Ingestion {
            file: file_name.to_string(),
            details: e.to_string(),
        })?;
        self.ingest_rows(file_name, &rows)
    }

    pub fn rows(&self) -> &[SpreadsheetRow] {
        &self.rows
    }

    pub fn files(&self) -> &[String] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_debt(&self) -> Decimal {
        self.rows.iter().map(|r| r.debt).sum()
    }

    pub fn reconcile_labels(&mut self, known_clients: &[KnownClient]) -> usize {
        reconcile_labels(&mut self.rows, known_clients)
    }

    pub fn clear(&mut self) {
        self.files.clear();
        self.rows.clear();
    }

    pub fn to_submission(&self, period: PeriodKey) -> SpreadsheetBatch {
        SpreadsheetBatch {
            period,
            period_type: period.period_type(),
            files: self.files.clone(),
            rows: self.rows.clone(),
        }
    }
}
