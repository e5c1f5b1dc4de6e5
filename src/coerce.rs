//! Per-column normalizers applied between validation and ingestion.
//!
//! Each coercer takes the batch by mutable reference and touches only the
//! columns it is responsible for. None of them adds columns: a coercer whose
//! target column is absent from the batch does nothing. Values that cannot be
//! coerced become null and are reported as one warning per column.

use chrono::NaiveDate;
use log::{debug, warn};

use crate::{
    batch::RowBatch,
    catalog::CatalogField,
    data::{Value, is_null_marker, parse_naive_date, parse_naive_datetime},
    types::ColumnType,
};

/// Columns used to synthesize point geometries.
#[derive(Debug, Clone)]
pub struct GeometryColumns {
    pub geometry: String,
    pub longitude: String,
    pub latitude: String,
}

/// Tracks failed conversions for a single column so the warning is emitted once.
#[derive(Debug, Default)]
struct Rejections {
    count: usize,
    sample: Option<String>,
}

impl Rejections {
    fn record(&mut self, raw: &Value) {
        self.count += 1;
        if self.sample.is_none() {
            self.sample = Some(raw.as_display());
        }
    }

    fn report(&self, coercer: &str, column: &str) {
        if self.count > 0 {
            warn!(
                "{coercer}: {} value(s) in '{column}' could not be converted and were set to null (first: {:?})",
                self.count,
                self.sample.as_deref().unwrap_or_default()
            );
        }
    }
}

fn coerce_column<F>(batch: &mut RowBatch, coercer: &str, column: &str, mut convert: F)
where
    F: FnMut(&Value) -> Option<Value>,
{
    let mut rejections = Rejections::default();
    batch.map_column(column, |cell| {
        let value = cell?;
        let converted = convert(&value);
        if converted.is_none() && !matches!(&value, Value::Text(s) if is_null_marker(s)) {
            rejections.record(&value);
        }
        converted
    });
    rejections.report(coercer, column);
}

fn columns_of(fields: &[CatalogField], ty: ColumnType) -> impl Iterator<Item = &str> {
    fields
        .iter()
        .filter(move |f| f.column_type == ty)
        .map(|f| f.name.as_str())
}

fn to_numeric(value: &Value) -> Option<Value> {
    match value {
        Value::Float(f) => Some(Value::Float(*f)),
        Value::Integer(i) => Some(Value::Float(*i as f64)),
        Value::Boolean(b) => Some(Value::Float(if *b { 1.0 } else { 0.0 })),
        Value::Text(s) if is_null_marker(s) => None,
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Value::Float),
        Value::Date(_) | Value::Timestamp(_) => None,
    }
}

fn to_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Integer(i) => Some(Value::Integer(*i)),
        Value::Float(f) => truncate(*f),
        Value::Boolean(b) => Some(Value::Integer(i64::from(*b))),
        Value::Text(s) if is_null_marker(s) => None,
        Value::Text(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .map(Value::Integer)
                .or_else(|| trimmed.parse::<f64>().ok().and_then(truncate))
        }
        Value::Date(_) | Value::Timestamp(_) => None,
    }
}

fn to_date(value: &Value) -> Option<Value> {
    match value {
        Value::Date(d) => Some(Value::Date(*d)),
        Value::Timestamp(dt) => Some(Value::Date(dt.date())),
        Value::Text(s) if is_null_marker(s) => None,
        Value::Text(s) => parse_naive_date(s).map(Value::Date),
        _ => None,
    }
}

fn to_timestamp(value: &Value) -> Option<Value> {
    match value {
        Value::Timestamp(dt) => Some(Value::Timestamp(*dt)),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
        Value::Text(s) if is_null_marker(s) => None,
        Value::Text(s) => parse_naive_datetime(s)
            .or_else(|| parse_naive_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
            .map(Value::Timestamp),
        _ => None,
    }
}

/// Numeric columns: null markers become null, text parses as float, and
/// integers widen to float.
pub fn numeric_fix(batch: &mut RowBatch, fields: &[CatalogField]) {
    for column in columns_of(fields, ColumnType::Numeric) {
        coerce_column(batch, "NumericFix", column, to_numeric);
    }
}

/// Integer columns: text parses as integer (or as float then truncated
/// toward zero), and floats are truncated toward zero.
pub fn integer_fix(batch: &mut RowBatch, fields: &[CatalogField]) {
    for column in columns_of(fields, ColumnType::Integer) {
        coerce_column(batch, "IntegerFix", column, to_integer);
    }
}

fn truncate(value: f64) -> Option<Value> {
    let truncated = value.trunc();
    if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
        Some(Value::Integer(truncated as i64))
    } else {
        None
    }
}

/// Boolean encodings recognised by [`bit_fix`], in priority order.
const BIT_CONVENTIONS: &[(&str, &str)] = &[("TRUE", "FALSE"), ("Y", "N"), ("L", "D"), ("1", "0")];

fn bit_token(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => {
            let trimmed = s.trim();
            // Float-typed exports write flags as 1.0 / 0.0.
            match trimmed.parse::<f64>() {
                Ok(f) if f.is_finite() && f.fract() == 0.0 => Some((f as i64).to_string()),
                _ => Some(trimmed.to_ascii_uppercase()),
            }
        }
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) if f.fract() == 0.0 => Some((*f as i64).to_string()),
        _ => None,
    }
}

/// Picks the convention for a column from its observed tokens: the first
/// convention covering every token, else the first sharing any token.
fn choose_convention(tokens: &[String]) -> Option<(&'static str, &'static str)> {
    let in_convention = |token: &String, (yes, no): (&str, &str)| token == yes || token == no;
    BIT_CONVENTIONS
        .iter()
        .copied()
        .find(|&c| tokens.iter().all(|t| in_convention(t, c)))
        .or_else(|| {
            BIT_CONVENTIONS
                .iter()
                .copied()
                .find(|&c| tokens.iter().any(|t| in_convention(t, c)))
        })
}

/// Bit columns: every value ends up as integer 0, 1, or null.
pub fn bit_fix(batch: &mut RowBatch, fields: &[CatalogField]) {
    for column in columns_of(fields, ColumnType::Bit) {
        let mut tokens = batch
            .column_values(column)
            .flatten()
            .filter(|v| !matches!(v, Value::Boolean(_)))
            .filter(|v| !matches!(v, Value::Text(s) if s.trim().is_empty()))
            .filter_map(bit_token)
            .collect::<Vec<_>>();
        tokens.sort();
        tokens.dedup();
        let convention = choose_convention(&tokens);
        debug!("BitFix: '{column}' tokens {tokens:?} -> convention {convention:?}");
        coerce_column(batch, "BitFix", column, |value| match value {
            Value::Boolean(b) => Some(Value::Integer(i64::from(*b))),
            Value::Text(s) if s.trim().is_empty() => None,
            other => {
                let token = bit_token(other)?;
                let (yes, no) = convention?;
                if token == yes {
                    Some(Value::Integer(1))
                } else if token == no {
                    Some(Value::Integer(0))
                } else {
                    None
                }
            }
        });
    }
}

/// Date and timestamp columns parse text in the accepted export formats.
pub fn date_fix(batch: &mut RowBatch, fields: &[CatalogField]) {
    for column in columns_of(fields, ColumnType::Date) {
        coerce_column(batch, "DateFix", column, to_date);
    }
    for column in columns_of(fields, ColumnType::Timestamp) {
        coerce_column(batch, "DateFix", column, to_timestamp);
    }
}

/// Comparison form of a cell for key matching: the value the coercer for
/// `ty` would produce. Bit cells compare by their normalized token, since
/// the 0/1 mapping depends on the whole column.
pub fn key_value(value: &Value, ty: ColumnType) -> Option<Value> {
    match ty {
        ColumnType::Text => Some(value.clone()),
        ColumnType::Numeric => to_numeric(value),
        ColumnType::Integer => to_integer(value),
        ColumnType::Date => to_date(value),
        ColumnType::Timestamp => to_timestamp(value),
        ColumnType::Bit => match value {
            Value::Boolean(b) => Some(Value::text(if *b { "1" } else { "0" })),
            Value::Text(s) if s.trim().is_empty() => None,
            other => bit_token(other).map(Value::Text),
        },
    }
}

/// Runs the catalog-driven coercers: numeric, integer, bit, and date.
pub fn apply_schema_coercions(batch: &mut RowBatch, fields: &[CatalogField]) {
    numeric_fix(batch, fields);
    integer_fix(batch, fields);
    bit_fix(batch, fields);
    date_fix(batch, fields);
}

fn coordinate(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Float(f) => Some(*f),
        Value::Integer(i) => Some(*i as f64),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

/// Fills null geometry cells with `POINT(lon lat)` built from the coordinate
/// columns. Existing geometry values are never replaced.
pub fn geometry_fix(batch: &mut RowBatch, columns: &GeometryColumns) -> usize {
    let (Some(geom), Some(lon), Some(lat)) = (
        batch.column_index(&columns.geometry),
        batch.column_index(&columns.longitude),
        batch.column_index(&columns.latitude),
    ) else {
        return 0;
    };
    let mut filled = 0usize;
    for row in batch.rows_mut() {
        if row[geom].is_some() {
            continue;
        }
        if let (Some(x), Some(y)) = (coordinate(row[lon].as_ref()), coordinate(row[lat].as_ref()))
        {
            row[geom] = Some(Value::Text(format!("POINT({x} {y})")));
            filled += 1;
        }
    }
    debug!("GeometryFix: synthesized {filled} point(s) into '{}'", columns.geometry);
    filled
}

/// Stamps every row with the run's load date, overwriting prior values.
pub fn load_timestamp_fix(batch: &mut RowBatch, column: &str, load_date: NaiveDate) -> bool {
    batch.map_column(column, |_| Some(Value::Date(load_date)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SchemaCatalog;

    fn fields(decls: &[(&str, &str)]) -> Vec<CatalogField> {
        let mut catalog = SchemaCatalog::default();
        for (name, ty) in decls {
            catalog.insert("t", name, ty).unwrap();
        }
        catalog.fields("t").unwrap().to_vec()
    }

    fn column(batch: &RowBatch, name: &str) -> Vec<Option<Value>> {
        batch.column_values(name).map(|v| v.cloned()).collect()
    }

    #[test]
    fn numeric_fix_nulls_markers_and_parses_floats() {
        let mut batch = RowBatch::from_text(&["Gap"], &[&["NA"], &["12.5"], &["oops"], &[""]]);
        numeric_fix(&mut batch, &fields(&[("Gap", "numeric")]));
        assert_eq!(
            column(&batch, "Gap"),
            vec![None, Some(Value::Float(12.5)), None, None]
        );
    }

    #[test]
    fn numeric_fix_widens_integers() {
        let mut batch = RowBatch::from_rows(
            vec!["Gap".into()],
            vec![vec![Some(Value::Integer(3))]],
        );
        numeric_fix(&mut batch, &fields(&[("Gap", "numeric")]));
        assert_eq!(column(&batch, "Gap"), vec![Some(Value::Float(3.0))]);
    }

    #[test]
    fn integer_fix_truncates_toward_zero() {
        let mut batch = RowBatch::from_rows(
            vec!["SeqNo".into()],
            vec![
                vec![Some(Value::Float(2.9))],
                vec![Some(Value::Float(-2.9))],
                vec![Some(Value::text("7.6"))],
                vec![Some(Value::text("NA"))],
                vec![Some(Value::text("12"))],
            ],
        );
        integer_fix(&mut batch, &fields(&[("SeqNo", "integer")]));
        assert_eq!(
            column(&batch, "SeqNo"),
            vec![
                Some(Value::Integer(2)),
                Some(Value::Integer(-2)),
                Some(Value::Integer(7)),
                None,
                Some(Value::Integer(12)),
            ]
        );
    }

    #[test]
    fn bit_fix_true_false_convention() {
        let mut batch = RowBatch::from_text(&["chckbox"], &[&["TRUE"], &["FALSE"]]);
        bit_fix(&mut batch, &fields(&[("chckbox", "bit")]));
        assert_eq!(
            column(&batch, "chckbox"),
            vec![Some(Value::Integer(1)), Some(Value::Integer(0))]
        );
    }

    #[test]
    fn bit_fix_yes_no_convention() {
        let mut batch = RowBatch::from_text(&["chckbox"], &[&["Y"], &["N"], &["Y"]]);
        bit_fix(&mut batch, &fields(&[("chckbox", "bit")]));
        assert_eq!(
            column(&batch, "chckbox"),
            vec![
                Some(Value::Integer(1)),
                Some(Value::Integer(0)),
                Some(Value::Integer(1))
            ]
        );
    }

    #[test]
    fn bit_fix_zero_one_convention() {
        let mut batch = RowBatch::from_text(&["chckbox"], &[&["0"], &["1"], &["1"]]);
        bit_fix(&mut batch, &fields(&[("chckbox", "bit")]));
        assert_eq!(
            column(&batch, "chckbox"),
            vec![
                Some(Value::Integer(0)),
                Some(Value::Integer(1)),
                Some(Value::Integer(1))
            ]
        );
    }

    #[test]
    fn bit_fix_live_dead_with_blanks() {
        let mut batch = RowBatch::from_text(&["Veg"], &[&["L"], &[""], &["D"]]);
        bit_fix(&mut batch, &fields(&[("Veg", "bit")]));
        assert_eq!(
            column(&batch, "Veg"),
            vec![Some(Value::Integer(1)), None, Some(Value::Integer(0))]
        );
    }

    #[test]
    fn bit_fix_nulls_tokens_outside_the_chosen_convention() {
        let mut batch = RowBatch::from_text(&["chckbox"], &[&["TRUE"], &["FALSE"], &["Y"]]);
        bit_fix(&mut batch, &fields(&[("chckbox", "bit")]));
        assert_eq!(
            column(&batch, "chckbox"),
            vec![Some(Value::Integer(1)), Some(Value::Integer(0)), None]
        );
    }

    #[test]
    fn bit_fix_maps_native_booleans() {
        let mut batch = RowBatch::from_rows(
            vec!["flag".into()],
            vec![
                vec![Some(Value::Boolean(true))],
                vec![Some(Value::Boolean(false))],
            ],
        );
        bit_fix(&mut batch, &fields(&[("flag", "boolean")]));
        assert_eq!(
            column(&batch, "flag"),
            vec![Some(Value::Integer(1)), Some(Value::Integer(0))]
        );
    }

    #[test]
    fn date_fix_parses_dates_and_nulls_garbage() {
        let mut batch =
            RowBatch::from_text(&["DateVisited"], &[&["2023-06-01"], &["6/2/2023"], &["soon"]]);
        date_fix(&mut batch, &fields(&[("DateVisited", "date")]));
        assert_eq!(
            column(&batch, "DateVisited"),
            vec![
                Some(Value::Date(NaiveDate::from_ymd_opt(2023, 6, 1).unwrap())),
                Some(Value::Date(NaiveDate::from_ymd_opt(2023, 6, 2).unwrap())),
                None
            ]
        );
    }

    fn geometry_columns() -> GeometryColumns {
        GeometryColumns {
            geometry: "wkb_geometry".into(),
            longitude: "Longitude_NAD83".into(),
            latitude: "Latitude_NAD83".into(),
        }
    }

    #[test]
    fn geometry_fix_only_fills_nulls() {
        let mut batch = RowBatch::from_text(
            &["wkb_geometry", "Longitude_NAD83", "Latitude_NAD83"],
            &[
                &["", "-106.5", "32.25"],
                &["POINT(1 2)", "-106.5", "32.25"],
                &["", "", "32.25"],
            ],
        );
        let filled = geometry_fix(&mut batch, &geometry_columns());
        assert_eq!(filled, 1);
        assert_eq!(
            column(&batch, "wkb_geometry"),
            vec![
                Some(Value::text("POINT(-106.5 32.25)")),
                Some(Value::text("POINT(1 2)")),
                None
            ]
        );
    }

    #[test]
    fn geometry_fix_requires_all_columns() {
        let mut batch = RowBatch::from_text(&["wkb_geometry"], &[&[""]]);
        assert_eq!(geometry_fix(&mut batch, &geometry_columns()), 0);
    }

    #[test]
    fn load_timestamp_overwrites_every_row() {
        let date = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let mut batch = RowBatch::from_text(&["DateLoadedInDb"], &[&["2001-01-01"], &[""]]);
        assert!(load_timestamp_fix(&mut batch, "DateLoadedInDb", date));
        assert_eq!(
            column(&batch, "DateLoadedInDb"),
            vec![Some(Value::Date(date)), Some(Value::Date(date))]
        );
    }

    #[test]
    fn bit_fix_reads_float_written_flags() {
        let mut batch = RowBatch::from_text(&["chckbox"], &[&["1.0"], &["0.0"], &["1"]]);
        bit_fix(&mut batch, &fields(&[("chckbox", "bit")]));
        assert_eq!(
            column(&batch, "chckbox"),
            vec![
                Some(Value::Integer(1)),
                Some(Value::Integer(0)),
                Some(Value::Integer(1))
            ]
        );
    }

    #[test]
    fn key_values_follow_coercion_rules() {
        assert_eq!(
            key_value(&Value::text("1.0"), ColumnType::Integer),
            key_value(&Value::text("1"), ColumnType::Integer)
        );
        assert_eq!(
            key_value(&Value::text("12.50"), ColumnType::Numeric),
            Some(Value::Float(12.5))
        );
        assert_eq!(
            key_value(&Value::text(" y"), ColumnType::Bit),
            key_value(&Value::text("Y"), ColumnType::Bit)
        );
        assert_eq!(key_value(&Value::text("NA"), ColumnType::Numeric), None);
        assert_eq!(
            key_value(&Value::text("1.0"), ColumnType::Text),
            Some(Value::text("1.0"))
        );
    }
}
