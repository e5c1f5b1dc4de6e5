use std::collections::BTreeSet;

use log::info;

use crate::{
    batch::RowBatch,
    catalog::CatalogField,
    coerce,
    data::Value,
    types::ColumnType,
};

/// Removes rows that repeat an earlier row on `key_columns`; the first
/// occurrence wins and row order is otherwise preserved. Key cells compare
/// in the form their catalog type coerces them to, so `1` and `1.0` in an
/// integer column are the same key. Key columns missing from the batch
/// compare as null.
pub fn dedup_on(batch: &mut RowBatch, key_columns: &[String], fields: &[CatalogField]) -> usize {
    let keys = key_columns
        .iter()
        .map(|name| {
            let ty = fields
                .iter()
                .find(|f| &f.name == name)
                .map_or(ColumnType::Text, |f| f.column_type);
            (batch.column_index(name), ty)
        })
        .collect::<Vec<_>>();
    let before = batch.len();
    let mut seen: BTreeSet<Vec<Option<Value>>> = BTreeSet::new();
    batch.retain_rows(|row| {
        let key = keys
            .iter()
            .map(|(idx, ty)| {
                idx.and_then(|i| row[i].as_ref())
                    .and_then(|value| coerce::key_value(value, *ty))
            })
            .collect::<Vec<_>>();
        seen.insert(key)
    });
    let removed = before - batch.len();
    if removed > 0 {
        info!("Removed {removed} duplicate row(s) on {key_columns:?}");
    }
    removed
}
