use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};

use crate::models::record::{ClickRecord, NormalizedRow, TransactionRecord};
use crate::services::parser::ParsedChunk;
use crate::services::row_hash::{click_row_hash, transaction_row_hash};

/// Aggregated output of one processing unit (a chunk or a whole file).
///
/// `line_count` carries the original source-line count forward so the
/// dataset's user-facing total reflects the file, not the collapsed keys.
#[derive(Debug)]
pub struct Aggregation {
    pub rows: AggregatedRows,
    pub line_count: u64,
}

#[derive(Debug)]
pub enum AggregatedRows {
    Transactions(Vec<TransactionRecord>),
    Clicks(Vec<ClickRecord>),
}

impl AggregatedRows {
    pub fn len(&self) -> usize {
        match self {
            Self::Transactions(v) => v.len(),
            Self::Clicks(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct TransactionKey {
    date: NaiveDate,
    time: Option<NaiveTime>,
    platform: Option<String>,
    category: Option<String>,
    product: String,
    status: Option<String>,
    sub_id1: Option<String>,
    order_id: Option<String>,
    product_id: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ClickKey {
    date: NaiveDate,
    channel: String,
    sub_id: Option<String>,
}

/// Group normalized rows by their dimension key and sum numeric measures,
/// producing at most one output row per distinct key. Aggregation happens
/// per processing unit only; across chunks the upsert's last write wins.
///
/// Groups whose dimension sets differ only outside the hash key (two chunks
/// of the same order in different states, say) collapse to the first
/// occurrence, mirroring the uniqueness constraint they would hit on insert.
pub fn aggregate(user_id: i64, parsed: &ParsedChunk) -> Aggregation {
    let mut tx_order: Vec<TransactionKey> = Vec::new();
    let mut tx_groups: HashMap<TransactionKey, TransactionRecord> = HashMap::new();
    let mut click_order: Vec<ClickKey> = Vec::new();
    let mut click_groups: HashMap<ClickKey, ClickRecord> = HashMap::new();
    let mut is_click = false;

    for row in &parsed.rows {
        match row {
            NormalizedRow::Transaction(t) => {
                let key = TransactionKey {
                    date: t.date,
                    time: t.time,
                    platform: t.platform.clone(),
                    category: t.category.clone(),
                    product: t.product.clone(),
                    status: t.status.clone(),
                    sub_id1: t.sub_id1.clone(),
                    order_id: t.order_id.clone(),
                    product_id: t.product_id.clone(),
                };
                match tx_groups.entry(key.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut e) => {
                        let existing = e.get_mut();
                        existing.revenue += t.revenue;
                        existing.commission += t.commission;
                        existing.cost += t.cost;
                        existing.profit += t.profit();
                        existing.quantity += t.quantity;
                    }
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(TransactionRecord {
                            date: t.date,
                            time: t.time,
                            product: t.product.clone(),
                            platform: t.platform.clone(),
                            category: t.category.clone(),
                            status: t.status.clone(),
                            sub_id1: t.sub_id1.clone(),
                            order_id: t.order_id.clone(),
                            product_id: t.product_id.clone(),
                            revenue: t.revenue,
                            commission: t.commission,
                            cost: t.cost,
                            profit: t.profit(),
                            quantity: t.quantity,
                            row_hash: transaction_row_hash(
                                user_id,
                                t.order_id.as_deref(),
                                t.product_id.as_deref(),
                            ),
                        });
                        tx_order.push(key);
                    }
                }
            }
            NormalizedRow::Click(c) => {
                is_click = true;
                let key = ClickKey {
                    date: c.date,
                    channel: c.channel.clone(),
                    sub_id: c.sub_id.clone(),
                };
                match click_groups.entry(key.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut e) => {
                        e.get_mut().clicks += c.clicks;
                    }
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(ClickRecord {
                            date: c.date,
                            // First time-of-day seen for the group.
                            time: c.time,
                            channel: c.channel.clone(),
                            sub_id: c.sub_id.clone(),
                            clicks: c.clicks,
                            row_hash: click_row_hash(
                                user_id,
                                c.date,
                                &c.channel,
                                c.sub_id.as_deref(),
                            ),
                        });
                        click_order.push(key);
                    }
                }
            }
        }
    }

    let rows = if is_click {
        let mut seen = std::collections::HashSet::new();
        let records = click_order
            .into_iter()
            .filter_map(|k| click_groups.remove(&k))
            .filter(|r| seen.insert(r.row_hash.clone()))
            .collect();
        AggregatedRows::Clicks(records)
    } else {
        let mut seen = std::collections::HashSet::new();
        let records = tx_order
            .into_iter()
            .filter_map(|k| tx_groups.remove(&k))
            .filter(|r| seen.insert(r.row_hash.clone()))
            .collect();
        AggregatedRows::Transactions(records)
    };

    Aggregation {
        rows,
        line_count: parsed.line_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobType;
    use crate::services::parser::parse_chunk;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn click_scenario_collapses_to_business_cardinality() {
        let csv = "Data,Canal,Cliques\n\
                   01/01/2024,Instagram,5\n\
                   01/01/2024,Instagram,3\n\
                   02/01/2024,Facebook,2\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        let agg = aggregate(42, &parsed);

        assert_eq!(agg.line_count, 3);
        let rows = match agg.rows {
            AggregatedRows::Clicks(v) => v,
            other => panic!("expected clicks, got {other:?}"),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(rows[0].channel, "Instagram");
        assert_eq!(rows[0].clicks, 8);
        assert_eq!(rows[1].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(rows[1].channel, "Facebook");
        assert_eq!(rows[1].clicks, 2);
    }

    #[test]
    fn transactions_sum_measures_and_derive_profit() {
        let csv = "ID do Pedido,Produto,Valor,Comissão,Custo,Quantidade,Data\n\
                   1,Fone,\"100,00\",\"10,00\",\"5,00\",1,01/01/2024\n\
                   1,Fone,\"100,00\",\"10,00\",\"5,00\",2,01/01/2024\n\
                   2,Capa,\"50,00\",\"5,00\",\"0,00\",1,01/01/2024\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Transaction, today()).unwrap();
        let agg = aggregate(1, &parsed);

        let rows = match agg.rows {
            AggregatedRows::Transactions(v) => v,
            other => panic!("expected transactions, got {other:?}"),
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].revenue, 200.0);
        assert_eq!(rows[0].commission, 20.0);
        assert_eq!(rows[0].quantity, 3);
        assert_eq!(rows[0].profit, 200.0 - 20.0 - 10.0);
        assert_eq!(rows[1].revenue, 50.0);
    }

    #[test]
    fn groups_sharing_a_hash_keep_first_occurrence() {
        // Same order/product key but different status: two groups, one hash.
        let csv = "ID do Pedido,ID do Item,Status,Valor,Data\n\
                   1,9,pago,\"10,00\",01/01/2024\n\
                   1,9,pendente,\"99,00\",01/01/2024\n";
        let parsed = parse_chunk(csv.as_bytes(), JobType::Transaction, today()).unwrap();
        let agg = aggregate(1, &parsed);
        let rows = match agg.rows {
            AggregatedRows::Transactions(v) => v,
            other => panic!("expected transactions, got {other:?}"),
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status.as_deref(), Some("pago"));
        assert_eq!(rows[0].revenue, 10.0);
    }

    #[test]
    fn row_hash_is_stable_across_identical_ingestions() {
        let csv = "Data,Canal,Cliques\n01/01/2024,Instagram,5\n";
        let parsed_a = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        let parsed_b = parse_chunk(csv.as_bytes(), JobType::Click, today()).unwrap();
        let a = aggregate(7, &parsed_a);
        let b = aggregate(7, &parsed_b);
        match (a.rows, b.rows) {
            (AggregatedRows::Clicks(x), AggregatedRows::Clicks(y)) => {
                assert_eq!(x[0].row_hash, y[0].row_hash);
            }
            other => panic!("expected clicks, got {other:?}"),
        }
    }
}
