use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// A sheet or CSV extract: a header row plus data rows of formatted cell text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Rows keyed by header. Short rows read as empty cells.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |cells| Record {
            table: self,
            cells: cells.as_slice(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a Table,
    cells: &'a [String],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.table.column_index(column)?;
        Some(self.cells.get(index).map(String::as_str).unwrap_or(""))
    }

    /// `(column, value)` pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let cells = self.cells;
        let table = self.table;
        table
            .columns
            .iter()
            .enumerate()
            .map(move |(index, column)| {
                (
                    column.as_str(),
                    cells.get(index).map(String::as_str).unwrap_or(""),
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActualRecord {
    pub hospital: String,
    pub recorded_at: NaiveDateTime,
    pub occupied_ward: f64,
    pub occupied_icu: f64,
    pub enabled_ward: f64,
    pub enabled_icu: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictedRecord {
    pub hospital: String,
    pub recorded_at: NaiveDateTime,
    pub predicted_total: f64,
    pub enabled_ward: f64,
    pub enabled_icu: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Actual,
    Predicted,
}

impl AlertKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AlertKind::Actual => "actual",
            AlertKind::Predicted => "predicted",
        }
    }
}

/// A row that crossed its dataset's threshold, before delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub kind: AlertKind,
    pub hospital: String,
    pub date: NaiveDate,
    pub ratio: f64,
    pub threshold: f64,
}

impl Breach {
    /// `actual-85`, `predicted-95`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.kind.prefix(), self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed,
}

impl DeliveryOutcome {
    pub fn from_delivered(delivered: bool) -> Self {
        if delivered {
            DeliveryOutcome::Sent
        } else {
            DeliveryOutcome::Failed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryOutcome::Sent => "sent",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub hospital: String,
    pub date: NaiveDate,
    pub ratio: f64,
    pub outcome: DeliveryOutcome,
}

impl AlertEvent {
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.kind.clone(),
            self.hospital.clone(),
            self.date.format("%Y-%m-%d").to_string(),
            format!("{:.2}", self.ratio),
            self.outcome.as_str().to_string(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub rows: usize,
    pub invalid_date: usize,
    pub outside_window: usize,
    pub malformed: usize,
    pub zero_capacity: usize,
    pub breaches: usize,
}

impl DatasetSummary {
    pub fn dropped(&self) -> usize {
        self.invalid_date + self.malformed + self.zero_capacity
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub actual: DatasetSummary,
    pub predicted: DatasetSummary,
    pub events: Vec<AlertEvent>,
}

impl EvaluationReport {
    pub fn sent(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.outcome == DeliveryOutcome::Sent)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.events.len() - self.sent()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSheet {
    pub file_name: String,
    pub sheet_name: String,
    pub rows: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub document: String,
    pub sheets: Vec<PublishedSheet>,
}
