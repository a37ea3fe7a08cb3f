//! Parameter marshaling.
//!
//! Call sites supply arguments as [`ParamValue<T>`], where the Rust type `T`
//! fixes the declared type tag. [`marshal`] pairs those arguments with the
//! operation's [`CallSpec`] and produces [`BoundParam`]s in declaration
//! order. Absent values bind the typed null sentinel with the declared type
//! and size; they never collapse to a zero value.

use crate::callspec::{CallSpec, ParamSpec};
use crate::error::{MarshalError, MarshalResult};
use crate::types::{Direction, Encoding, ParamSize, SqlType, StoreValue};
use chrono::NaiveDateTime;
use std::collections::HashSet;
use uuid::Uuid;

/// An optional scalar argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue<T> {
    /// A value was supplied.
    Present(T),
    /// No value was supplied ("unknown", not zero).
    Absent,
}

impl<T> ParamValue<T> {
    /// Returns true if no value was supplied.
    pub fn is_absent(&self) -> bool {
        matches!(self, ParamValue::Absent)
    }

    /// Converts into an `Option`.
    pub fn into_option(self) -> Option<T> {
        match self {
            ParamValue::Present(value) => Some(value),
            ParamValue::Absent => None,
        }
    }
}

impl<T> Default for ParamValue<T> {
    fn default() -> Self {
        ParamValue::Absent
    }
}

impl<T> From<Option<T>> for ParamValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => ParamValue::Present(value),
            None => ParamValue::Absent,
        }
    }
}

/// Rust types that bind natively to a procedure parameter.
pub trait SqlParam {
    /// Type tag the value binds as.
    const SQL_TYPE: SqlType;

    /// Converts into the raw store value.
    fn into_store_value(self) -> StoreValue;
}

macro_rules! sql_param {
    ($ty:ty, $tag:ident, $variant:ident) => {
        impl SqlParam for $ty {
            const SQL_TYPE: SqlType = SqlType::$tag;

            fn into_store_value(self) -> StoreValue {
                StoreValue::$variant(self)
            }
        }
    };
}

sql_param!(bool, Bool, Bool);
sql_param!(i32, Int, Int);
sql_param!(i64, BigInt, BigInt);
sql_param!(f64, Float, Float);
sql_param!(String, Text, Text);
sql_param!(Vec<u8>, Binary, Binary);
sql_param!(NaiveDateTime, DateTime, DateTime);
sql_param!(Uuid, Guid, Guid);

impl SqlParam for &str {
    const SQL_TYPE: SqlType = SqlType::Text;

    fn into_store_value(self) -> StoreValue {
        StoreValue::Text(self.to_owned())
    }
}

impl SqlParam for &[u8] {
    const SQL_TYPE: SqlType = SqlType::Binary;

    fn into_store_value(self) -> StoreValue {
        StoreValue::Binary(self.to_vec())
    }
}

/// A single call-site argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    name: String,
    sql_type: SqlType,
    value: StoreValue,
}

impl Arg {
    /// Creates an argument from a typed optional value.
    pub fn new<T: SqlParam>(name: impl Into<String>, value: ParamValue<T>) -> Self {
        Self {
            name: name.into(),
            sql_type: T::SQL_TYPE,
            value: match value {
                ParamValue::Present(v) => v.into_store_value(),
                ParamValue::Absent => StoreValue::Null,
            },
        }
    }

    /// Returns the argument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type tag fixed by the argument's Rust type.
    pub fn sql_type(&self) -> SqlType {
        self.sql_type
    }

    /// Returns the raw value (`Null` when absent).
    pub fn value(&self) -> &StoreValue {
        &self.value
    }
}

/// An ordered argument list for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    args: Vec<Arg>,
}

impl Args {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an optional argument.
    pub fn with<T: SqlParam>(mut self, name: impl Into<String>, value: ParamValue<T>) -> Self {
        self.args.push(Arg::new(name, value));
        self
    }

    /// Adds a present argument.
    pub fn value<T: SqlParam>(self, name: impl Into<String>, value: T) -> Self {
        self.with(name, ParamValue::Present(value))
    }

    /// Adds an argument from an `Option`.
    pub fn optional<T: SqlParam>(self, name: impl Into<String>, value: Option<T>) -> Self {
        self.with(name, ParamValue::from(value))
    }

    /// Adds an absent argument of type `T`.
    pub fn absent<T: SqlParam>(self, name: impl Into<String>) -> Self {
        self.with::<T>(name, ParamValue::Absent)
    }

    /// Looks up an argument by name.
    pub fn get(&self, name: &str) -> Option<&Arg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Iterates over the arguments in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.args.iter()
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// A parameter ready to hand to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Parameter name.
    pub name: String,
    /// Declared type (kept for nulls too).
    pub sql_type: SqlType,
    /// Declared size (kept for nulls too).
    pub size: ParamSize,
    /// Input or output.
    pub direction: Direction,
    /// Bound value; `StoreValue::Null` is the null sentinel.
    pub value: StoreValue,
}

impl BoundParam {
    /// Returns true if the parameter binds the null sentinel.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Returns how the value travels to the store.
    pub fn encoding(&self) -> Encoding {
        match self.size {
            ParamSize::Unbounded if self.sql_type.is_variable_length() => Encoding::Streamed,
            _ => Encoding::Inline,
        }
    }
}

impl ParamSpec {
    /// Binds a raw value against this declaration.
    ///
    /// Pure: the same declaration and value always produce the same
    /// parameter. Output parameters ignore `value` and bind null.
    pub fn bind(&self, value: StoreValue) -> MarshalResult<BoundParam> {
        let value = match self.direction {
            Direction::Output => StoreValue::Null,
            Direction::Input => self.check_input(value)?,
        };

        Ok(BoundParam {
            name: self.name.clone(),
            sql_type: self.sql_type,
            size: self.size,
            direction: self.direction,
            value,
        })
    }

    fn check_input(&self, value: StoreValue) -> MarshalResult<StoreValue> {
        let Some(supplied) = value.sql_type() else {
            return Ok(StoreValue::Null);
        };

        if supplied != self.sql_type {
            return Err(MarshalError::TypeMismatch {
                name: self.name.clone(),
                declared: self.sql_type,
                supplied,
            });
        }

        if let Some(len) = value.length() {
            if !self.size.admits(len) {
                return Err(MarshalError::Oversize {
                    name: self.name.clone(),
                    declared: self.size,
                    actual: len,
                });
            }
        }

        if self.zero_means_absent && value.as_i64().is_some_and(|n| n <= 0) {
            return Ok(StoreValue::Null);
        }

        Ok(value)
    }
}

/// Binds `args` against `spec`, producing parameters in declaration order.
///
/// Every declared input needs exactly one argument (possibly absent);
/// arguments that name no declared input, or repeat a name, are rejected.
/// Output parameters bind null with their declared type and size.
pub fn marshal(spec: &CallSpec, args: &Args) -> MarshalResult<Vec<BoundParam>> {
    let mut seen = HashSet::with_capacity(args.len());
    if let Some(repeated) = args.iter().find(|a| !seen.insert(a.name())) {
        return Err(MarshalError::DuplicateArgument {
            operation: spec.operation().to_string(),
            name: repeated.name().to_string(),
        });
    }

    if let Some(stray) = args
        .iter()
        .find(|a| spec.find(a.name()).map_or(true, ParamSpec::is_output))
    {
        return Err(MarshalError::UnknownArgument {
            operation: spec.operation().to_string(),
            name: stray.name().to_string(),
        });
    }

    spec.params()
        .iter()
        .map(|param| match param.direction {
            Direction::Output => param.bind(StoreValue::Null),
            Direction::Input => {
                let arg = args
                    .get(&param.name)
                    .ok_or_else(|| MarshalError::MissingArgument {
                        operation: spec.operation().to_string(),
                        name: param.name.clone(),
                    })?;
                if arg.sql_type() != param.sql_type {
                    return Err(MarshalError::TypeMismatch {
                        name: param.name.clone(),
                        declared: param.sql_type,
                        supplied: arg.sql_type(),
                    });
                }
                param.bind(arg.value().clone())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, FaultKind};
    use proptest::prelude::*;

    fn insert_log() -> CallSpec {
        CallSpec::non_query("InsertCaseLog", "usp_InsertCaseLog")
            .param(ParamSpec::input("logId", SqlType::Int))
            .param(ParamSpec::input("message", SqlType::Text).bounded(10))
            .param(ParamSpec::input("attachment", SqlType::Binary).unbounded())
            .param(ParamSpec::output("returnValue", SqlType::Int))
    }

    #[test]
    fn absent_binds_typed_null() {
        let args = Args::new()
            .absent::<i32>("logId")
            .value("message", "opened")
            .absent::<Vec<u8>>("attachment");

        let bound = marshal(&insert_log(), &args).unwrap();
        assert_eq!(bound.len(), 4);

        let log_id = &bound[0];
        assert!(log_id.is_null());
        assert_eq!(log_id.sql_type, SqlType::Int);
        assert_eq!(log_id.size, ParamSize::Bounded(4));
        assert_ne!(log_id.value, StoreValue::Int(0));

        assert_eq!(bound[1].value, StoreValue::Text("opened".into()));
        assert_eq!(bound[2].encoding(), Encoding::Streamed);
        assert_eq!(bound[1].encoding(), Encoding::Inline);

        let ret = &bound[3];
        assert_eq!(ret.direction, Direction::Output);
        assert!(ret.is_null());
    }

    #[test]
    fn present_zero_stays_zero() {
        let args = Args::new()
            .value("logId", 0i32)
            .value("message", "x")
            .absent::<Vec<u8>>("attachment");
        let bound = marshal(&insert_log(), &args).unwrap();
        assert_eq!(bound[0].value, StoreValue::Int(0));
    }

    #[test]
    fn zero_as_absent_is_per_parameter() {
        let spec = CallSpec::query("GetCasesByOwner", "usp_GetCasesByOwner")
            .param(ParamSpec::input("ownerId", SqlType::Int).zero_as_absent());

        let bound = marshal(&spec, &Args::new().value("ownerId", 0i32)).unwrap();
        assert!(bound[0].is_null());

        let bound = marshal(&spec, &Args::new().value("ownerId", -3i32)).unwrap();
        assert!(bound[0].is_null());

        let bound = marshal(&spec, &Args::new().value("ownerId", 12i32)).unwrap();
        assert_eq!(bound[0].value, StoreValue::Int(12));
    }

    #[test]
    fn oversize_text_is_a_defect() {
        let args = Args::new()
            .absent::<i32>("logId")
            .value("message", "this is far too long")
            .absent::<Vec<u8>>("attachment");
        assert!(matches!(
            marshal(&insert_log(), &args),
            Err(MarshalError::Oversize { actual: 20, .. })
        ));
    }

    #[test]
    fn type_mismatch_is_a_defect() {
        let args = Args::new()
            .value("logId", 7i64)
            .value("message", "x")
            .absent::<Vec<u8>>("attachment");
        assert!(matches!(
            marshal(&insert_log(), &args),
            Err(MarshalError::TypeMismatch {
                declared: SqlType::Int,
                supplied: SqlType::BigInt,
                ..
            })
        ));
    }

    #[test]
    fn absent_with_wrong_type_is_still_a_defect() {
        let args = Args::new()
            .absent::<String>("logId")
            .value("message", "x")
            .absent::<Vec<u8>>("attachment");
        assert!(matches!(
            marshal(&insert_log(), &args),
            Err(MarshalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn missing_and_unknown_arguments() {
        let args = Args::new().value("message", "x");
        assert!(matches!(
            marshal(&insert_log(), &args),
            Err(MarshalError::MissingArgument { .. })
        ));

        let args = Args::new()
            .absent::<i32>("logId")
            .value("message", "x")
            .absent::<Vec<u8>>("attachment")
            .value("returnValue", 1i32);
        assert!(matches!(
            marshal(&insert_log(), &args),
            Err(MarshalError::UnknownArgument { .. })
        ));
    }

    #[test]
    fn repeated_argument_is_rejected() {
        let args = Args::new()
            .absent::<i32>("logId")
            .value("message", "first")
            .value("message", "second")
            .absent::<Vec<u8>>("attachment");

        let err = marshal(&insert_log(), &args).unwrap_err();
        assert_eq!(
            err,
            MarshalError::DuplicateArgument {
                operation: "InsertCaseLog".into(),
                name: "message".into(),
            }
        );
        assert_eq!(BridgeError::from(err).kind(), FaultKind::MarshalDefect);
    }

    #[test]
    fn param_value_from_option() {
        assert_eq!(ParamValue::from(Some(3)), ParamValue::Present(3));
        assert!(ParamValue::<i32>::from(None).is_absent());
        assert_eq!(ParamValue::Present("a").into_option(), Some("a"));
    }

    proptest! {
        #[test]
        fn marshaling_is_idempotent(id in proptest::option::of(any::<i32>()), text in "[a-z]{0,10}") {
            let args = Args::new()
                .optional("logId", id)
                .value("message", text)
                .absent::<Vec<u8>>("attachment");
            let spec = insert_log();
            let first = marshal(&spec, &args).unwrap();
            let second = marshal(&spec, &args).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
