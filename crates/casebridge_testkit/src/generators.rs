//! Property-based test generators using proptest.
//!
//! Strategies produce parameter declarations and values that fit them, so
//! properties can focus on marshaling behavior rather than on rejection.

use casebridge_core::{ParamSize, ParamSpec, RetryConfig, SqlType, StoreValue};
use chrono::NaiveDateTime;
use proptest::prelude::*;
use std::time::Duration;
use uuid::Uuid;

/// Strategy for any declared type.
pub fn sql_type_strategy() -> impl Strategy<Value = SqlType> {
    prop_oneof![
        Just(SqlType::Bool),
        Just(SqlType::Int),
        Just(SqlType::BigInt),
        Just(SqlType::Float),
        Just(SqlType::Text),
        Just(SqlType::Binary),
        Just(SqlType::DateTime),
        Just(SqlType::Guid),
    ]
}

/// Strategy for parameter names.
pub fn param_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-zA-Z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for a valid input declaration.
///
/// Text and binary parameters are bounded or unbounded; fixed-width types
/// keep their width.
pub fn input_spec_strategy() -> impl Strategy<Value = ParamSpec> {
    (
        param_name_strategy(),
        sql_type_strategy(),
        prop_oneof![Just(None), (1u32..64).prop_map(Some)],
    )
        .prop_map(|(name, sql_type, bound)| {
            let spec = ParamSpec::input(name, sql_type);
            match (sql_type.is_variable_length(), bound) {
                (true, Some(max)) => spec.bounded(max),
                _ => spec,
            }
        })
}

fn datetime_strategy() -> impl Strategy<Value = NaiveDateTime> {
    (0i64..4_000_000_000).prop_map(|secs| {
        chrono::DateTime::from_timestamp(secs, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    })
}

/// Strategy for a non-null value of `sql_type` no longer than `size`.
pub fn value_strategy(sql_type: SqlType, size: ParamSize) -> BoxedStrategy<StoreValue> {
    let max_len = match size {
        ParamSize::Bounded(n) => n as usize,
        ParamSize::Unbounded => 256,
    };
    match sql_type {
        SqlType::Bool => any::<bool>().prop_map(StoreValue::Bool).boxed(),
        SqlType::Int => any::<i32>().prop_map(StoreValue::Int).boxed(),
        SqlType::BigInt => any::<i64>().prop_map(StoreValue::BigInt).boxed(),
        SqlType::Float => (-1.0e9f64..1.0e9).prop_map(StoreValue::Float).boxed(),
        SqlType::Text => prop::collection::vec(any::<char>(), 0..=max_len)
            .prop_map(|chars| StoreValue::Text(chars.into_iter().collect()))
            .boxed(),
        SqlType::Binary => prop::collection::vec(any::<u8>(), 0..=max_len)
            .prop_map(StoreValue::Binary)
            .boxed(),
        SqlType::DateTime => datetime_strategy().prop_map(StoreValue::DateTime).boxed(),
        SqlType::Guid => any::<u128>()
            .prop_map(|n| StoreValue::Guid(Uuid::from_u128(n)))
            .boxed(),
    }
}

/// Strategy for an input declaration paired with a value that fits it.
pub fn fitting_input_strategy() -> impl Strategy<Value = (ParamSpec, StoreValue)> {
    input_spec_strategy().prop_flat_map(|spec| {
        let values = value_strategy(spec.sql_type, spec.size);
        (Just(spec), values)
    })
}

/// Strategy for retry configurations with a cap at or above the base delay.
pub fn retry_config_strategy() -> impl Strategy<Value = RetryConfig> {
    (1u32..10, 1u64..500, 0u64..5_000, any::<bool>()).prop_map(
        |(attempts, base, extra, jitter)| {
            RetryConfig::new(attempts)
                .with_initial_delay(Duration::from_millis(base))
                .with_max_delay(Duration::from_millis(base + extra))
                .with_jitter(jitter)
        },
    )
}
