use std::borrow::Cow;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use csv::ReaderBuilder;

use crate::models::job::JobType;
use crate::models::record::{ClickFacts, NormalizedRow, TransactionFacts};
use crate::services::columns::{ColumnMap, Field};
use crate::services::normalize::{parse_count, parse_numeric, parse_stamp, parse_time, ParsedStamp};

/// Channel value substituted when no channel column resolves.
pub const UNKNOWN_CHANNEL: &str = "Desconhecido";

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("CSV read error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result of normalizing one chunk of source CSV.
#[derive(Debug)]
pub struct ParsedChunk {
    pub rows: Vec<NormalizedRow>,
    /// Number of source data lines consumed (pre-aggregation).
    pub line_count: u64,
    /// Non-fatal warnings: unresolved columns, unparseable dates, fallbacks.
    pub warnings: Vec<String>,
}

/// Decode file bytes: UTF-8 first, then Latin-1 (every byte is a code point,
/// so the fallback cannot fail).
fn decode(bytes: &[u8]) -> Cow<'_, str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Parse and normalize one chunk of CSV into typed rows.
///
/// Soft-fail by design: missing columns degrade to defaults with warnings,
/// unparseable dates fall back to `today`, and no individual cell can abort
/// the chunk. Only an unreadable file is an error.
pub fn parse_chunk(
    bytes: &[u8],
    job_type: JobType,
    today: NaiveDate,
) -> Result<ParsedChunk, ParseError> {
    let text = decode(bytes);
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut columns = ColumnMap::resolve(&headers);
    let mut warnings = std::mem::take(&mut columns.warnings);

    let records: Vec<csv::StringRecord> = reader.records().filter_map(|r| r.ok()).collect();

    // No date column resolved: probe the remaining columns on the first
    // record and adopt the first one that parses as a date.
    let date_index = match columns.index_of(Field::Date) {
        Some(idx) => Some(idx),
        None => {
            let probed = records.first().and_then(|rec| {
                (0..headers.len()).find(|&i| {
                    !columns.claimed_indices().contains(&i)
                        && rec.get(i).and_then(|c| parse_stamp(c.trim())).is_some()
                })
            });
            match probed {
                Some(i) => {
                    warnings.push(format!(
                        "no date column recognized; using column '{}'",
                        headers.get(i).map(String::as_str).unwrap_or("?")
                    ));
                    Some(i)
                }
                None => {
                    warnings.push("no date column found; using processing date".to_string());
                    None
                }
            }
        }
    };

    let mut fallback_key_warned = false;
    let mut rows = Vec::with_capacity(records.len());
    let mut line_count = 0u64;

    for (line_index, record) in records.iter().enumerate() {
        line_count += 1;

        let stamp = date_index
            .and_then(|i| record.get(i))
            .and_then(|c| parse_stamp(c.trim()))
            .unwrap_or(ParsedStamp { date: today, time: None });
        let time = columns
            .cell(Field::Time, record)
            .and_then(parse_time)
            .or(stamp.time);

        let extra = extra_bag(&columns, &headers, record);

        match job_type {
            JobType::Transaction => {
                let order_id = match columns.cell(Field::OrderId, record) {
                    Some(v) => Some(v.to_string()),
                    None if columns.index_of(Field::OrderId).is_none() => {
                        // No business-key column at all: fall back to the
                        // source line index so rows stay distinguishable.
                        if !fallback_key_warned {
                            warnings.push(
                                "no order-id column found; using line index as identifier"
                                    .to_string(),
                            );
                            fallback_key_warned = true;
                        }
                        Some(line_index.to_string())
                    }
                    None => None,
                };

                let product = columns
                    .cell(Field::Product, record)
                    .map(str::to_string)
                    .unwrap_or_else(|| line_index.to_string());

                rows.push(NormalizedRow::Transaction(TransactionFacts {
                    date: stamp.date,
                    time,
                    product,
                    platform: owned_cell(&columns, Field::Platform, record),
                    category: owned_cell(&columns, Field::Category, record),
                    status: owned_cell(&columns, Field::Status, record),
                    sub_id1: owned_cell(&columns, Field::SubId1, record),
                    order_id,
                    product_id: owned_cell(&columns, Field::ProductId, record),
                    revenue: measure(&columns, Field::Revenue, record, 0.0),
                    commission: measure(&columns, Field::Commission, record, 0.0),
                    cost: measure(&columns, Field::Cost, record, 0.0),
                    quantity: count_measure(&columns, Field::Quantity, record, 1),
                    extra,
                }));
            }
            JobType::Click => {
                let channel = columns
                    .cell(Field::Channel, record)
                    .or_else(|| columns.cell(Field::Platform, record))
                    .map(str::to_string)
                    .unwrap_or_else(|| UNKNOWN_CHANNEL.to_string());
                let sub_id = owned_cell(&columns, Field::SubId, record)
                    .or_else(|| owned_cell(&columns, Field::SubId1, record));
                // Without a clicks column, each line is one click event.
                let clicks = match columns.index_of(Field::Clicks) {
                    Some(_) => columns
                        .cell(Field::Clicks, record)
                        .and_then(parse_count)
                        .unwrap_or(0)
                        .max(0),
                    None => 1,
                };

                rows.push(NormalizedRow::Click(ClickFacts {
                    date: stamp.date,
                    time,
                    channel,
                    sub_id,
                    clicks,
                    extra,
                }));
            }
        }
    }

    Ok(ParsedChunk {
        rows,
        line_count,
        warnings,
    })
}

fn owned_cell(columns: &ColumnMap, field: Field, record: &csv::StringRecord) -> Option<String> {
    columns.cell(field, record).map(str::to_string)
}

/// Monetary measure: parsed, defaulted, clamped to zero.
fn measure(columns: &ColumnMap, field: Field, record: &csv::StringRecord, default: f64) -> f64 {
    let v = match columns.index_of(field) {
        Some(_) => columns
            .cell(field, record)
            .and_then(parse_numeric)
            .unwrap_or(0.0),
        None => default,
    };
    v.max(0.0)
}

fn count_measure(columns: &ColumnMap, field: Field, record: &csv::StringRecord, default: i64) -> i64 {
    match columns.index_of(field) {
        Some(_) => columns
            .cell(field, record)
            .and_then(parse_count)
            .unwrap_or(0)
            .max(0),
        None => default,
    }
}

/// Cells in columns no canonical field claimed, preserved verbatim.
fn extra_bag(
    columns: &ColumnMap,
    headers: &[String],
    record: &csv::StringRecord,
) -> BTreeMap<String, String> {
    let claimed = columns.claimed_indices();
    let mut bag = BTreeMap::new();
    for (i, header) in headers.iter().enumerate() {
        if claimed.contains(&i) {
            continue;
        }
        if let Some(cell) = record.get(i) {
            let cell = cell.trim();
            if !cell.is_empty() {
                bag.insert(header.clone(), cell.to_string());
            }
        }
    }
    bag
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn parses_click_csv_with_portuguese_headers() {
        let csv = "Data,Canal,Cliques\n01/01/2024,Instagram,5\n01/01/2024,Instagram,3\n02/01/2024,Facebook,2\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        assert_eq!(parsed.line_count, 3);
        assert_eq!(parsed.rows.len(), 3);
        match &parsed.rows[0] {
            NormalizedRow::Click(c) => {
                assert_eq!(c.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
                assert_eq!(c.channel, "Instagram");
                assert_eq!(c.clicks, 5);
            }
            other => panic!("expected click row, got {other:?}"),
        }
    }

    #[test]
    fn missing_clicks_column_counts_one_per_line() {
        let csv = "Data,Canal\n01/01/2024,Instagram\n01/01/2024,Instagram\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        for row in &parsed.rows {
            match row {
                NormalizedRow::Click(c) => assert_eq!(c.clicks, 1),
                other => panic!("unexpected row {other:?}"),
            }
        }
    }

    #[test]
    fn transaction_measures_parse_brazilian_currency() {
        let csv = "ID do Pedido,Produto,Valor de Compra(R$),Comissão Líquida do Afiliado(R$),Data\n\
                   1001,Fone,\"R$ 1.234,56\",\"R$ 45,00\",05/03/2024\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Transaction, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Transaction(t) => {
                assert_eq!(t.order_id.as_deref(), Some("1001"));
                assert_eq!(t.revenue, 1234.56);
                assert_eq!(t.commission, 45.0);
                assert_eq!(t.quantity, 1);
                assert_eq!(t.date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
            }
            other => panic!("expected transaction row, got {other:?}"),
        }
    }

    #[test]
    fn missing_date_column_probes_then_defaults() {
        // A parseable date hides in an unrecognized column.
        let csv = "Canal,Quando\nInstagram,2024-02-02\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Click(c) => {
                assert_eq!(c.date, NaiveDate::from_ymd_opt(2024, 2, 2).unwrap())
            }
            other => panic!("unexpected row {other:?}"),
        }

        // Nothing date-like at all: processing date plus a warning.
        let csv = "Canal\nInstagram\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Click(c) => assert_eq!(c.date, today()),
            other => panic!("unexpected row {other:?}"),
        }
        assert!(parsed.warnings.iter().any(|w| w.contains("date")));
    }

    #[test]
    fn missing_order_id_falls_back_to_line_index() {
        let csv = "Data,Produto,Valor\n01/01/2024,Fone,10\n01/01/2024,Capa,20\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Transaction, today()).unwrap();
        let ids: Vec<_> = parsed
            .rows
            .iter()
            .map(|r| match r {
                NormalizedRow::Transaction(t) => t.order_id.clone(),
                other => panic!("unexpected row {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![Some("0".to_string()), Some("1".to_string())]);
        assert!(parsed.warnings.iter().any(|w| w.contains("order-id")));
    }

    #[test]
    fn latin1_bytes_decode() {
        let mut bytes = b"Data,Comiss".to_vec();
        bytes.push(0xE3); // ã in Latin-1
        bytes.extend_from_slice(b"o\n01/01/2024,\"10,5\"\n");
        let parsed = parse_chunk(&bytes, JobType::Transaction, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Transaction(t) => assert_eq!(t.commission, 10.5),
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn unclaimed_columns_land_in_extra_bag() {
        let csv = "Data,Canal,Observação\n01/01/2024,Instagram,campanha X\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Click(c) => {
                assert_eq!(c.extra.get("Observação").map(String::as_str), Some("campanha X"))
            }
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn negative_measures_clamp_to_zero() {
        let csv = "ID do Pedido,Data,Valor de Compra(R$)\n1,01/01/2024,\"-50,00\"\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Transaction, today()).unwrap();
        match &parsed.rows[0] {
            NormalizedRow::Transaction(t) => assert_eq!(t.revenue, 0.0),
            other => panic!("unexpected row {other:?}"),
        }
    }

    #[test]
    fn empty_file_yields_zero_lines() {
        let parsed = parse_chunk(b"Data,Canal\n", JobType::Click, today()).unwrap();
        assert_eq!(parsed.line_count, 0);
        assert!(parsed.rows.is_empty());
    }
}
