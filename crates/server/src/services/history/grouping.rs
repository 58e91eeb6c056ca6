//! Projection of one batch's records into a [`HistoryBatchGroup`].
//!
//! Context comes only from the `product_batch_context` snapshots stored in
//! the same batch. Nothing here looks at live product state, so an old
//! batch keeps showing the quantities it had when it was written.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use estoque_core::{
    BatchId, ChangePayload, HistoryBatchGroup, HistoryRecord, HistoryRecordView,
    ProductBatchSummary, ProductContext, ProductId,
};

/// Merged view of every snapshot a batch holds for one product.
#[derive(Debug, Clone)]
struct Snapshot {
    name: String,
    before: Decimal,
    after: Decimal,
}

/// Collect context snapshots keyed by product id.
///
/// `records` must be oldest first. Repeated snapshots for a product keep the
/// first `before` and take `after` (and a non-empty name) from the last one.
fn collect_snapshots(records: &[HistoryRecord]) -> BTreeMap<ProductId, Snapshot> {
    let mut snapshots: BTreeMap<ProductId, Snapshot> = BTreeMap::new();

    for record in records {
        let ChangePayload::ProductBatchContext(detail) = &record.payload else {
            continue;
        };

        snapshots
            .entry(detail.product_id.clone())
            .and_modify(|snapshot| {
                snapshot.after = detail.quantity_after_batch;
                if !detail.product_name.is_empty() {
                    snapshot.name.clone_from(&detail.product_name);
                }
            })
            .or_insert_with(|| Snapshot {
                name: detail.product_name.clone(),
                before: detail.quantity_before_batch,
                after: detail.quantity_after_batch,
            });
    }

    snapshots
}

fn context_for(
    record: &HistoryRecord,
    snapshots: &BTreeMap<ProductId, Snapshot>,
) -> ProductContext {
    record
        .related_product_id()
        .and_then(|product_id| {
            snapshots
                .get(&product_id)
                .map(|snapshot| ProductContext::Available {
                    product_id,
                    product_name: snapshot.name.clone(),
                    product_current_total_quantity: snapshot.after,
                })
        })
        .unwrap_or(ProductContext::Unavailable)
}

/// Build the grouped view of one batch.
///
/// `records` are the batch's records oldest first, context records included;
/// they stay in the output and count towards `record_count`.
#[must_use]
pub fn build_group(
    batch_id: BatchId,
    created_at: DateTime<Utc>,
    records: Vec<HistoryRecord>,
) -> HistoryBatchGroup {
    let snapshots = collect_snapshots(&records);

    let product_summaries = snapshots
        .iter()
        .map(|(product_id, snapshot)| {
            (
                product_id.clone(),
                ProductBatchSummary {
                    product_id: product_id.clone(),
                    product_name: snapshot.name.clone(),
                    total_quantity_before_batch: snapshot.before,
                    total_quantity_after_batch: snapshot.after,
                    net_quantity_change_in_batch: snapshot.after - snapshot.before,
                },
            )
        })
        .collect();

    let records: Vec<HistoryRecordView> = records
        .into_iter()
        .map(|record| HistoryRecordView {
            product_context: context_for(&record, &snapshots),
            record,
        })
        .collect();

    HistoryBatchGroup {
        batch_id,
        created_at,
        record_count: records.len(),
        records,
        product_summaries,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::Duration;
    use estoque_core::{
        ChangeAction, LoteChangeDetail, LoteId, NewHistoryRecord, ProductBatchContextChangeDetail,
        ProductChange,
    };
    use proptest::prelude::*;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(entity_id: &str, payload: ChangePayload, secs: i64) -> HistoryRecord {
        NewHistoryRecord {
            timestamp: Some(base() + Duration::seconds(secs)),
            ..NewHistoryRecord::new(entity_id, payload).in_batch(BatchId::new("B1"))
        }
        .into_record()
    }

    fn context(product: &str, name: &str, before: i64, after: i64, secs: i64) -> HistoryRecord {
        record(
            product,
            ChangePayload::ProductBatchContext(ProductBatchContextChangeDetail {
                product_id: ProductId::new(product),
                product_name: name.to_owned(),
                quantity_before_batch: Decimal::from(before),
                quantity_after_batch: Decimal::from(after),
            }),
            secs,
        )
    }

    fn lote_created(product: &str, secs: i64) -> HistoryRecord {
        let lote_id = LoteId::generate();
        record(
            &lote_id.to_string(),
            ChangePayload::Lote(LoteChangeDetail::new(
                ChangeAction::Created,
                lote_id,
                ProductId::new(product),
            )),
            secs,
        )
    }

    #[test]
    fn test_lote_record_gets_context_from_snapshot() {
        let group = build_group(
            BatchId::new("B1"),
            base(),
            vec![lote_created("P1", 0), context("P1", "Alade", 0, 10, 1)],
        );

        assert_eq!(group.record_count, 2);
        assert_eq!(
            group.records[0].product_context,
            ProductContext::Available {
                product_id: ProductId::new("P1"),
                product_name: "Alade".to_owned(),
                product_current_total_quantity: Decimal::from(10),
            }
        );

        let summary = &group.product_summaries[&ProductId::new("P1")];
        assert_eq!(summary.total_quantity_before_batch, Decimal::ZERO);
        assert_eq!(summary.total_quantity_after_batch, Decimal::from(10));
        assert_eq!(summary.net_quantity_change_in_batch, Decimal::from(10));
    }

    #[test]
    fn test_missing_snapshot_marks_context_unavailable() {
        let product = record(
            "P2",
            ChangePayload::Product(ProductChange::new(ChangeAction::Updated)),
            0,
        );
        let group = build_group(BatchId::new("B1"), base(), vec![product]);

        assert_eq!(group.records[0].product_context, ProductContext::Unavailable);
        assert!(group.product_summaries.is_empty());
    }

    #[test]
    fn test_lote_record_without_product_is_unavailable() {
        let mut change =
            LoteChangeDetail::new(ChangeAction::Deleted, LoteId::generate(), ProductId::new("P1"));
        change.product_id = None;
        let group = build_group(
            BatchId::new("B1"),
            base(),
            vec![
                record("l", ChangePayload::Lote(change), 0),
                context("P1", "Alade", 5, 0, 1),
            ],
        );

        assert_eq!(group.records[0].product_context, ProductContext::Unavailable);
    }

    #[test]
    fn test_repeated_snapshots_are_merged() {
        let group = build_group(
            BatchId::new("B1"),
            base(),
            vec![
                context("P1", "Alade", 10, 15, 0),
                context("P1", "Alade Forte", 15, 12, 1),
            ],
        );

        let summary = &group.product_summaries[&ProductId::new("P1")];
        assert_eq!(summary.product_name, "Alade Forte");
        assert_eq!(summary.total_quantity_before_batch, Decimal::from(10));
        assert_eq!(summary.total_quantity_after_batch, Decimal::from(12));
        assert_eq!(summary.net_quantity_change_in_batch, Decimal::from(2));
    }

    #[test]
    fn test_blank_later_name_keeps_earlier_name() {
        let group = build_group(
            BatchId::new("B1"),
            base(),
            vec![context("P1", "Alade", 1, 2, 0), context("P1", "", 2, 3, 1)],
        );

        assert_eq!(
            group.product_summaries[&ProductId::new("P1")].product_name,
            "Alade"
        );
    }

    proptest! {
        #[test]
        fn prop_summary_net_is_after_minus_before(
            snaps in prop::collection::vec((0u8..4, -1000i64..1000, -1000i64..1000), 0..12)
        ) {
            let records: Vec<HistoryRecord> = snaps
                .iter()
                .enumerate()
                .map(|(i, (p, before, after))| {
                    context(&format!("P{p}"), "x", *before, *after, i64::try_from(i).unwrap())
                })
                .collect();
            let count = records.len();

            let group = build_group(BatchId::new("B1"), base(), records);

            prop_assert_eq!(group.record_count, count);
            prop_assert_eq!(group.records.len(), count);
            for summary in group.product_summaries.values() {
                prop_assert_eq!(
                    summary.net_quantity_change_in_batch,
                    summary.total_quantity_after_batch - summary.total_quantity_before_batch
                );
            }
        }
    }
}
