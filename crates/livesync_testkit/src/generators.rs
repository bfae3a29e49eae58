//! Property-based test generators using proptest.

use livesync_store::{ChildRow, Value};
use proptest::prelude::*;

/// Strategy for field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for valid field paths, plain or hierarchical.
pub fn field_path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        field_name_strategy(),
        (field_name_strategy(), field_name_strategy()).prop_map(|(t, f)| format!("{t}.{f}")),
        (field_name_strategy(), 0usize..8, field_name_strategy())
            .prop_map(|(t, i, f)| format!("{t}[{i}].{f}")),
    ]
}

/// Strategy for scalar values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::string::string_regex("[A-Za-z0-9 ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for child rows keyed by distinct integers in `0..max_key`.
///
/// Every row carries a `key` and a non-null text `v`.
pub fn keyed_rows_strategy(max_key: i64, max_rows: usize) -> impl Strategy<Value = Vec<ChildRow>> {
    prop::collection::btree_map(0..max_key, "[a-z]{1,6}", 0..=max_rows).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(idx, (key, v))| {
                let mut row = ChildRow::new().with("key", key).with("v", v);
                row.idx = idx;
                row
            })
            .collect()
    })
}

/// Like [`keyed_rows_strategy`], with every row given a persisted identity.
pub fn persisted_rows_strategy(
    max_key: i64,
    max_rows: usize,
) -> impl Strategy<Value = Vec<ChildRow>> {
    keyed_rows_strategy(max_key, max_rows).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(i, mut row)| {
                row.name = Some(format!("row-{i}"));
                row
            })
            .collect()
    })
}
