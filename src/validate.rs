//! Reconciliation of incoming batches with the schema catalog.

use log::{debug, info, warn};

use crate::{batch::RowBatch, catalog::SchemaCatalog, error::IngestResult};

/// Aligns `batch` to the catalog entry for `table`: unknown columns are
/// dropped, missing catalog columns are added as nulls, and the result
/// follows catalog order. Re-validating a validated batch is a no-op.
pub fn validate(batch: &RowBatch, catalog: &SchemaCatalog, table: &str) -> IngestResult<RowBatch> {
    let expected = catalog.field_names(table)?;
    for column in batch.columns() {
        if !expected.contains(column) {
            debug!("Dropping column '{column}' from '{table}': not in catalog");
        }
    }
    for column in &expected {
        if !batch.has_column(column) {
            info!("Added null field '{column}' to '{table}'");
        }
    }
    Ok(batch.select(&expected))
}

/// Final drift check before handoff to the store. A batch whose columns no
/// longer equal the catalog's is forced back down to the catalog list.
pub fn reconcile(batch: RowBatch, catalog: &SchemaCatalog, table: &str) -> IngestResult<RowBatch> {
    let expected = catalog.field_names(table)?;
    if batch.columns() == expected.as_slice() {
        return Ok(batch);
    }
    let extra = batch
        .columns()
        .iter()
        .filter(|c| !expected.contains(c))
        .cloned()
        .collect::<Vec<_>>();
    let missing = expected
        .iter()
        .filter(|c| !batch.has_column(c))
        .cloned()
        .collect::<Vec<_>>();
    warn!(
        "Column drift on '{table}' (extra: {extra:?}, missing: {missing:?}); reselecting catalog columns"
    );
    Ok(batch.select(&expected))
}
