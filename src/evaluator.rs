//! The alerting pass: read both occupancy sheets, select the rows that breach their
//! threshold inside the trailing window, notify once per breach and record every attempt
//! in the audit log with one append.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::config::{ACTUAL_SHEET, LOG_HEADER, LOG_SHEET, PREDICTED_SHEET};
use crate::models::{
    ActualRecord, AlertEvent, AlertKind, Breach, DatasetSummary, DeliveryOutcome,
    EvaluationReport, PredictedRecord, Record, Table,
};
use crate::occupancy::{
    actual_ratio, hospital_from_indicators, occupancy_ratio, parse_date, parse_number,
    AlertPolicy, UNKNOWN_HOSPITAL,
};
use crate::report;
use crate::sheets::SpreadsheetStore;
use crate::telegram::Messenger;

pub const DATE_COLUMN: &str = "fecha";
pub const OCCUPIED_WARD_COLUMN: &str = "camas_ocupadas_planta";
pub const OCCUPIED_ICU_COLUMN: &str = "camas_ocupadas_uci";
pub const ENABLED_WARD_COLUMN: &str = "camas_habilitadas_planta";
pub const ENABLED_ICU_COLUMN: &str = "camas_habilitadas_uci";
pub const PREDICTED_TOTAL_COLUMN: &str = "pred_camas_total";
pub const HOSPITAL_COLUMN: &str = "hospital";

enum RowError {
    InvalidDate,
    Malformed,
}

fn number(record: &Record<'_>, column: &str) -> Result<f64, RowError> {
    record
        .get(column)
        .and_then(parse_number)
        .ok_or(RowError::Malformed)
}

fn recorded_at(record: &Record<'_>) -> Result<NaiveDateTime, RowError> {
    record
        .get(DATE_COLUMN)
        .and_then(parse_date)
        .ok_or(RowError::InvalidDate)
}

fn parse_actual(record: &Record<'_>) -> Result<ActualRecord, RowError> {
    Ok(ActualRecord {
        recorded_at: recorded_at(record)?,
        hospital: hospital_from_indicators(record.fields()),
        occupied_ward: number(record, OCCUPIED_WARD_COLUMN)?,
        occupied_icu: number(record, OCCUPIED_ICU_COLUMN)?,
        enabled_ward: number(record, ENABLED_WARD_COLUMN)?,
        enabled_icu: number(record, ENABLED_ICU_COLUMN)?,
    })
}

fn parse_predicted(record: &Record<'_>) -> Result<PredictedRecord, RowError> {
    let hospital = record
        .get(HOSPITAL_COLUMN)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_HOSPITAL);

    Ok(PredictedRecord {
        recorded_at: recorded_at(record)?,
        hospital: hospital.to_string(),
        predicted_total: number(record, PREDICTED_TOTAL_COLUMN)?,
        enabled_ward: number(record, ENABLED_WARD_COLUMN)?,
        enabled_icu: number(record, ENABLED_ICU_COLUMN)?,
    })
}

/// One dataset's view of a row once it has parsed: when it was recorded, who it
/// belongs to and its ratio (`None` for zero capacity).
struct Scored {
    recorded_at: NaiveDateTime,
    hospital: String,
    ratio: Option<f64>,
}

impl From<ActualRecord> for Scored {
    fn from(record: ActualRecord) -> Self {
        Scored {
            ratio: actual_ratio(
                record.occupied_ward + record.occupied_icu,
                record.enabled_ward + record.enabled_icu,
            ),
            recorded_at: record.recorded_at,
            hospital: record.hospital,
        }
    }
}

impl From<PredictedRecord> for Scored {
    fn from(record: PredictedRecord) -> Self {
        Scored {
            ratio: occupancy_ratio(
                record.predicted_total,
                record.enabled_ward + record.enabled_icu,
            ),
            recorded_at: record.recorded_at,
            hospital: record.hospital,
        }
    }
}

fn select<F>(
    table: &Table,
    kind: AlertKind,
    threshold: f64,
    cutoff: NaiveDateTime,
    parse: F,
) -> (Vec<Breach>, DatasetSummary)
where
    F: Fn(&Record<'_>) -> Result<Scored, RowError>,
{
    let mut summary = DatasetSummary {
        rows: table.len(),
        ..DatasetSummary::default()
    };
    let mut breaches = Vec::new();

    for (index, record) in table.records().enumerate() {
        let scored = match parse(&record) {
            Ok(scored) => scored,
            Err(RowError::InvalidDate) => {
                tracing::debug!(
                    dataset = kind.prefix(),
                    row = index + 2,
                    "dropping row with unparseable date"
                );
                summary.invalid_date += 1;
                continue;
            }
            Err(RowError::Malformed) => {
                tracing::debug!(
                    dataset = kind.prefix(),
                    row = index + 2,
                    "dropping row with non-numeric bed counts"
                );
                summary.malformed += 1;
                continue;
            }
        };

        if scored.recorded_at < cutoff {
            summary.outside_window += 1;
            continue;
        }

        let Some(ratio) = scored.ratio else {
            tracing::warn!(
                dataset = kind.prefix(),
                row = index + 2,
                hospital = %scored.hospital,
                "skipping row with zero enabled beds"
            );
            summary.zero_capacity += 1;
            continue;
        };

        if ratio >= threshold {
            breaches.push(Breach {
                kind,
                hospital: scored.hospital,
                date: scored.recorded_at.date(),
                ratio,
                threshold,
            });
        }
    }

    summary.breaches = breaches.len();
    (breaches, summary)
}

/// Breaches in the actual dataset, in row order.
pub fn select_actual(
    table: &Table,
    policy: &AlertPolicy,
    now: DateTime<Utc>,
) -> (Vec<Breach>, DatasetSummary) {
    select(
        table,
        AlertKind::Actual,
        policy.actual_threshold,
        policy.cutoff(now),
        |record| parse_actual(record).map(Scored::from),
    )
}

/// Breaches in the predicted dataset, in row order.
pub fn select_predicted(
    table: &Table,
    policy: &AlertPolicy,
    now: DateTime<Utc>,
) -> (Vec<Breach>, DatasetSummary) {
    select(
        table,
        AlertKind::Predicted,
        policy.predicted_threshold,
        policy.cutoff(now),
        |record| parse_predicted(record).map(Scored::from),
    )
}

fn log_loaded(sheet: &str, table: &Table) {
    if table.is_empty() {
        tracing::warn!(sheet, "source sheet has no data rows");
    } else {
        tracing::info!(sheet, rows = table.len(), "loaded sheet");
    }
}

fn log_summary(dataset: &str, summary: &DatasetSummary) {
    if summary.dropped() > 0 {
        tracing::warn!(
            dataset,
            invalid_date = summary.invalid_date,
            malformed = summary.malformed,
            zero_capacity = summary.zero_capacity,
            "dropped rows"
        );
    }
    tracing::info!(
        dataset,
        rows = summary.rows,
        outside_window = summary.outside_window,
        breaches = summary.breaches,
        "evaluated dataset"
    );
}

/// Runs the alerting pass against `document` as of `now`.
///
/// Source sheets are only read. Every breach gets one delivery attempt and one audit row,
/// actual breaches first. Nothing is written to the log when there are no breaches.
pub async fn evaluate<S, M>(
    sheets: &S,
    messenger: &M,
    document: &str,
    policy: &AlertPolicy,
    now: DateTime<Utc>,
) -> anyhow::Result<EvaluationReport>
where
    S: SpreadsheetStore + ?Sized,
    M: Messenger + ?Sized,
{
    let document = sheets
        .open(document)
        .await
        .with_context(|| format!("failed to open spreadsheet '{document}'"))?;

    let actual_table = sheets
        .read_sheet(&document, ACTUAL_SHEET)
        .await
        .with_context(|| format!("failed to read sheet '{ACTUAL_SHEET}'"))?;
    log_loaded(ACTUAL_SHEET, &actual_table);

    let predicted_table = sheets
        .read_sheet(&document, PREDICTED_SHEET)
        .await
        .with_context(|| format!("failed to read sheet '{PREDICTED_SHEET}'"))?;
    log_loaded(PREDICTED_SHEET, &predicted_table);

    tracing::info!(since = %policy.cutoff(now).date(), "analyzing records");

    let (actual, actual_summary) = select_actual(&actual_table, policy, now);
    log_summary(AlertKind::Actual.prefix(), &actual_summary);
    let (predicted, predicted_summary) = select_predicted(&predicted_table, policy, now);
    log_summary(AlertKind::Predicted.prefix(), &predicted_summary);

    let mut events = Vec::with_capacity(actual.len() + predicted.len());
    for breach in actual.into_iter().chain(predicted) {
        let delivered = messenger.deliver(&report::alert_message(&breach)).await;
        let outcome = DeliveryOutcome::from_delivered(delivered);
        if outcome == DeliveryOutcome::Failed {
            tracing::warn!(kind = %breach.label(), hospital = %breach.hospital, "alert delivery failed");
        }

        events.push(AlertEvent {
            timestamp: now,
            kind: breach.label(),
            hospital: breach.hospital,
            date: breach.date,
            ratio: breach.ratio,
            outcome,
        });
    }

    if events.is_empty() {
        tracing::info!("no occupancy thresholds crossed");
    } else {
        let header: Vec<String> = LOG_HEADER.iter().map(|column| column.to_string()).collect();
        sheets
            .ensure_sheet(&document, LOG_SHEET, &header)
            .await
            .with_context(|| format!("failed to prepare sheet '{LOG_SHEET}'"))?;

        let rows: Vec<Vec<String>> = events.iter().map(AlertEvent::to_row).collect();
        sheets
            .append_rows(&document, LOG_SHEET, &rows)
            .await
            .with_context(|| format!("failed to append to sheet '{LOG_SHEET}'"))?;
        tracing::info!(sheet = LOG_SHEET, rows = rows.len(), "recorded alerts");
    }

    Ok(EvaluationReport {
        actual: actual_summary,
        predicted: predicted_summary,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemorySheets, ScriptedMessenger};
    use chrono::{Duration, TimeZone};

    const DOCUMENT: &str = "Predicciones Hospitalarias";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 15, 0).unwrap()
    }

    fn days_ago(days: i64) -> String {
        (now() - Duration::days(days)).format("%Y-%m-%d").to_string()
    }

    fn table(columns: &[&str], rows: Vec<Vec<String>>) -> Table {
        Table::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    fn actual_table(rows: &[(&str, &str, [f64; 4])]) -> Table {
        table(
            &[
                DATE_COLUMN,
                "hospital_A",
                "hospital_B",
                OCCUPIED_WARD_COLUMN,
                OCCUPIED_ICU_COLUMN,
                ENABLED_WARD_COLUMN,
                ENABLED_ICU_COLUMN,
            ],
            rows.iter()
                .map(|(date, hospital, beds)| {
                    let mut row = vec![
                        date.to_string(),
                        if *hospital == "A" { "1" } else { "0" }.to_string(),
                        if *hospital == "B" { "1" } else { "0" }.to_string(),
                    ];
                    row.extend(beds.iter().map(|value| value.to_string()));
                    row
                })
                .collect(),
        )
    }

    fn predicted_table(rows: &[(&str, &str, [f64; 3])]) -> Table {
        table(
            &[
                HOSPITAL_COLUMN,
                DATE_COLUMN,
                PREDICTED_TOTAL_COLUMN,
                ENABLED_WARD_COLUMN,
                ENABLED_ICU_COLUMN,
            ],
            rows.iter()
                .map(|(hospital, date, beds)| {
                    let mut row = vec![hospital.to_string(), date.to_string()];
                    row.extend(beds.iter().map(|value| value.to_string()));
                    row
                })
                .collect(),
        )
    }

    fn store(actual: Table, predicted: Table) -> MemorySheets {
        let sheets = MemorySheets::default();
        sheets.insert(DOCUMENT, ACTUAL_SHEET, actual);
        sheets.insert(DOCUMENT, PREDICTED_SHEET, predicted);
        sheets
    }

    #[test]
    fn actual_breach_resolves_one_hot_hospital() {
        let today = days_ago(0);
        let table = actual_table(&[(today.as_str(), "A", [80.0, 10.0, 90.0, 10.0])]);
        let (breaches, summary) = select_actual(&table, &AlertPolicy::default(), now());

        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].hospital, "A");
        assert_eq!(breaches[0].ratio, 90.0);
        assert_eq!(breaches[0].label(), "actual-85");
        assert_eq!(summary.breaches, 1);
    }

    #[test]
    fn actual_ratio_is_capped_at_capacity() {
        let today = days_ago(0);
        let table = actual_table(&[(today.as_str(), "B", [120.0, 5.0, 100.0, 5.0])]);
        let (breaches, _) = select_actual(&table, &AlertPolicy::default(), now());
        assert_eq!(breaches[0].ratio, 100.0);
    }

    #[test]
    fn actual_rows_without_indicator_are_unknown() {
        let today = days_ago(0);
        let table = actual_table(&[(today.as_str(), "", [90.0, 0.0, 100.0, 0.0])]);
        let (breaches, _) = select_actual(&table, &AlertPolicy::default(), now());
        assert_eq!(breaches[0].hospital, UNKNOWN_HOSPITAL);
    }

    #[test]
    fn predicted_threshold_is_inclusive() {
        let today = days_ago(0);
        let table = predicted_table(&[
            ("B", today.as_str(), [190.0, 100.0, 100.0]),
            ("C", today.as_str(), [9499.0, 5000.0, 5000.0]),
        ]);
        let (breaches, summary) = select_predicted(&table, &AlertPolicy::default(), now());

        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].hospital, "B");
        assert_eq!(breaches[0].ratio, 95.0);
        assert_eq!(breaches[0].label(), "predicted-95");
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.breaches, 1);
    }

    #[test]
    fn predicted_ratio_is_not_capped() {
        let today = days_ago(0);
        let table = predicted_table(&[("B", today.as_str(), [250.0, 100.0, 100.0])]);
        let (breaches, _) = select_predicted(&table, &AlertPolicy::default(), now());
        assert_eq!(breaches[0].ratio, 125.0);
    }

    #[test]
    fn rows_outside_window_are_excluded() {
        let old = days_ago(200);
        let boundary = days_ago(180);
        let inside = days_ago(179);
        let table = actual_table(&[
            (old.as_str(), "A", [100.0, 10.0, 100.0, 10.0]),
            (boundary.as_str(), "A", [100.0, 10.0, 100.0, 10.0]),
            (inside.as_str(), "B", [100.0, 10.0, 100.0, 10.0]),
        ]);
        let (breaches, summary) = select_actual(&table, &AlertPolicy::default(), now());

        // midnight 180 days back is earlier than the 09:15 cutoff
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].hospital, "B");
        assert_eq!(summary.outside_window, 2);
    }

    #[test]
    fn unparseable_and_malformed_rows_are_counted() {
        let today = days_ago(0);
        let mut table = actual_table(&[
            ("someday", "A", [100.0, 10.0, 100.0, 10.0]),
            ("", "A", [100.0, 10.0, 100.0, 10.0]),
            (today.as_str(), "A", [100.0, 10.0, 100.0, 10.0]),
        ]);
        table.rows[2][3] = "n/a".to_string();

        let (breaches, summary) = select_actual(&table, &AlertPolicy::default(), now());
        assert!(breaches.is_empty());
        assert_eq!(summary.invalid_date, 2);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.dropped(), 3);
    }

    #[test]
    fn zero_capacity_rows_never_alert() {
        let today = days_ago(0);
        let actual = actual_table(&[(today.as_str(), "A", [10.0, 1.0, 0.0, 0.0])]);
        let predicted = predicted_table(&[("B", today.as_str(), [0.0, 0.0, 0.0])]);

        let (actual_breaches, actual_summary) =
            select_actual(&actual, &AlertPolicy::default(), now());
        let (predicted_breaches, predicted_summary) =
            select_predicted(&predicted, &AlertPolicy::default(), now());

        assert!(actual_breaches.is_empty());
        assert!(predicted_breaches.is_empty());
        assert_eq!(actual_summary.zero_capacity, 1);
        assert_eq!(predicted_summary.zero_capacity, 1);
    }

    #[tokio::test]
    async fn alerts_and_audit_rows_follow_emission_order() {
        let today = days_ago(0);
        let yesterday = days_ago(1);
        let sheets = store(
            actual_table(&[
                (today.as_str(), "B", [95.0, 5.0, 100.0, 10.0]),
                (today.as_str(), "A", [10.0, 1.0, 100.0, 10.0]),
                (yesterday.as_str(), "A", [80.0, 10.0, 90.0, 10.0]),
            ]),
            predicted_table(&[
                ("C", today.as_str(), [200.0, 100.0, 100.0]),
                ("D", yesterday.as_str(), [196.0, 100.0, 100.0]),
            ]),
        );
        let messenger = ScriptedMessenger::new(vec![true, false, true, true]);

        let report = evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap();

        let hospitals: Vec<&str> = report.events.iter().map(|e| e.hospital.as_str()).collect();
        assert_eq!(hospitals, vec!["B", "A", "C", "D"]);
        assert_eq!(messenger.messages().len(), 4);
        assert!(messenger.messages()[0].contains("Hospital: B"));
        assert_eq!(report.sent(), 3);
        assert_eq!(report.failed(), 1);

        let log = sheets.sheet(DOCUMENT, LOG_SHEET).unwrap();
        assert_eq!(log.columns, LOG_HEADER.to_vec());
        assert_eq!(sheets.append_calls(), 1);
        assert_eq!(
            log.rows,
            vec![
                vec!["2026-10-18 09:15:00", "actual-85", "B", today.as_str(), "90.91", "sent"],
                vec!["2026-10-18 09:15:00", "actual-85", "A", yesterday.as_str(), "90.00", "failed"],
                vec!["2026-10-18 09:15:00", "predicted-95", "C", today.as_str(), "100.00", "sent"],
                vec!["2026-10-18 09:15:00", "predicted-95", "D", yesterday.as_str(), "98.00", "sent"],
            ]
        );
    }

    #[tokio::test]
    async fn no_breaches_means_no_log_write() {
        let today = days_ago(0);
        let sheets = store(
            actual_table(&[(today.as_str(), "A", [10.0, 1.0, 100.0, 10.0])]),
            predicted_table(&[("B", today.as_str(), [9499.0, 5000.0, 5000.0])]),
        );
        let messenger = ScriptedMessenger::new(Vec::new());

        let report = evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap();

        assert!(report.events.is_empty());
        assert!(messenger.messages().is_empty());
        assert_eq!(sheets.append_calls(), 0);
        assert!(sheets.sheet(DOCUMENT, LOG_SHEET).is_none());
    }

    #[tokio::test]
    async fn empty_source_sheets_evaluate_cleanly() {
        let sheets = store(actual_table(&[]), predicted_table(&[]));
        let messenger = ScriptedMessenger::new(Vec::new());

        let report = evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap();

        assert!(report.events.is_empty());
        assert_eq!(report.actual.rows, 0);
        assert_eq!(sheets.append_calls(), 0);
    }

    #[tokio::test]
    async fn existing_log_is_appended_not_replaced() {
        let today = days_ago(0);
        let sheets = store(
            actual_table(&[(today.as_str(), "A", [80.0, 10.0, 90.0, 10.0])]),
            predicted_table(&[]),
        );
        let previous = vec![
            "2026-10-17 09:15:00".to_string(),
            "actual-85".to_string(),
            "A".to_string(),
            "2026-10-17".to_string(),
            "91.00".to_string(),
            "sent".to_string(),
        ];
        sheets.insert(
            DOCUMENT,
            LOG_SHEET,
            table(&LOG_HEADER, vec![previous.clone()]),
        );
        let messenger = ScriptedMessenger::new(vec![true]);

        evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap();

        let log = sheets.sheet(DOCUMENT, LOG_SHEET).unwrap();
        assert_eq!(log.rows.len(), 2);
        assert_eq!(log.rows[0], previous);
    }

    #[tokio::test]
    async fn source_sheets_are_left_untouched() {
        let today = days_ago(0);
        let actual = actual_table(&[(today.as_str(), "A", [80.0, 10.0, 90.0, 10.0])]);
        let predicted = predicted_table(&[("B", today.as_str(), [190.0, 100.0, 100.0])]);
        let sheets = store(actual.clone(), predicted.clone());
        let messenger = ScriptedMessenger::new(vec![true, true]);

        evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap();

        assert_eq!(sheets.sheet(DOCUMENT, ACTUAL_SHEET), Some(actual));
        assert_eq!(sheets.sheet(DOCUMENT, PREDICTED_SHEET), Some(predicted));
    }

    #[tokio::test]
    async fn missing_source_sheet_is_fatal() {
        let sheets = MemorySheets::default();
        sheets.insert(DOCUMENT, ACTUAL_SHEET, actual_table(&[]));
        let messenger = ScriptedMessenger::new(Vec::new());

        let err = evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(PREDICTED_SHEET));
    }

    #[tokio::test]
    async fn audit_log_failure_is_fatal_after_delivery() {
        let today = days_ago(0);
        let sheets = store(
            actual_table(&[(today.as_str(), "A", [80.0, 10.0, 90.0, 10.0])]),
            predicted_table(&[]),
        );
        sheets.fail_appends();
        let messenger = ScriptedMessenger::new(vec![true]);

        let err = evaluate(&sheets, &messenger, DOCUMENT, &AlertPolicy::default(), now())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(LOG_SHEET));
        assert_eq!(messenger.messages().len(), 1);
    }
}
