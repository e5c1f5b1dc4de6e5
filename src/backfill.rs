use std::collections::{BTreeSet, HashMap};

use log::info;

use crate::{batch::RowBatch, data::Value};

/// Distinct non-null key values of `key_column`, in sorted order.
pub fn distinct_keys(batch: &RowBatch, key_column: &str) -> Vec<String> {
    batch
        .column_values(key_column)
        .flatten()
        .map(Value::as_display)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Fills null visit dates from `visits` (header key -> visit date). Non-null
/// values are never replaced. Returns the number of cells filled.
pub fn backfill_date_visited(
    batch: &mut RowBatch,
    key_column: &str,
    date_column: &str,
    visits: &HashMap<String, Value>,
) -> usize {
    let (Some(key_idx), Some(date_idx)) =
        (batch.column_index(key_column), batch.column_index(date_column))
    else {
        return 0;
    };
    let mut filled = 0usize;
    for row in batch.rows_mut() {
        if row[date_idx].is_some() {
            continue;
        }
        let Some(key) = row[key_idx].as_ref().map(Value::as_display) else {
            continue;
        };
        if let Some(visited) = visits.get(&key) {
            row[date_idx] = Some(visited.clone());
            filled += 1;
        }
    }
    if filled > 0 {
        info!("Backfilled {filled} '{date_column}' value(s) from the header table");
    }
    filled
}
