//! Declarative call specs.
//!
//! A [`CallSpec`] describes one remote operation: which stored procedure it
//! runs, the ordered parameter list with type, size and direction, and
//! whether the procedure answers with a row count or a row set. Specs are
//! built once at startup, validated, and shared read-only afterwards.

use crate::error::{MarshalError, MarshalResult};
use crate::types::{Direction, ParamSize, SqlType};
use std::collections::HashSet;

/// Declaration of a single procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name as the store knows it.
    pub name: String,
    /// Declared type.
    pub sql_type: SqlType,
    /// Declared maximum size.
    pub size: ParamSize,
    /// Input or output.
    pub direction: Direction,
    /// Whether a zero or negative integer means "no value" for this parameter.
    ///
    /// Identifier filters disagree on this across operations, so each
    /// operation opts in explicitly.
    pub zero_means_absent: bool,
}

impl ParamSpec {
    /// Declares an input parameter with the type's default size.
    pub fn input(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            size: sql_type.default_size(),
            direction: Direction::Input,
            zero_means_absent: false,
        }
    }

    /// Declares an output parameter with the type's default size.
    pub fn output(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            direction: Direction::Output,
            ..Self::input(name, sql_type)
        }
    }

    /// Sets the declared size.
    pub fn with_size(mut self, size: ParamSize) -> Self {
        self.size = size;
        self
    }

    /// Declares a bounded size.
    pub fn bounded(self, max: u32) -> Self {
        self.with_size(ParamSize::Bounded(max))
    }

    /// Declares an unbounded size.
    pub fn unbounded(self) -> Self {
        self.with_size(ParamSize::Unbounded)
    }

    /// Treats zero and negative integers as "no value".
    pub fn zero_as_absent(mut self) -> Self {
        self.zero_means_absent = true;
        self
    }

    /// Returns true for output parameters.
    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }

    fn validate(&self, operation: &str) -> MarshalResult<()> {
        let invalid = |reason: String| MarshalError::InvalidSpec {
            operation: operation.to_string(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("parameter name is empty".into()));
        }

        match (self.sql_type.fixed_width(), self.size) {
            (None, ParamSize::Bounded(0)) => Err(invalid(format!(
                "parameter {} has a zero bounded size",
                self.name
            ))),
            (Some(width), ParamSize::Bounded(size)) if size != width => Err(invalid(format!(
                "parameter {} of type {} declares size {}, expected {}",
                self.name, self.sql_type, size, width
            ))),
            (Some(_), ParamSize::Unbounded) => Err(invalid(format!(
                "parameter {} of fixed-width type {} cannot be unbounded",
                self.name, self.sql_type
            ))),
            _ => Ok(()),
        }?;

        if self.zero_means_absent && !matches!(self.sql_type, SqlType::Int | SqlType::BigInt) {
            return Err(invalid(format!(
                "parameter {} treats zero as absent but is not an integer",
                self.name
            )));
        }

        Ok(())
    }
}

/// What a procedure answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// A count of affected rows.
    RowsAffected,
    /// A sequence of rows.
    Rows,
}

/// Declarative description of one remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    operation: String,
    procedure: String,
    params: Vec<ParamSpec>,
    shape: ResultShape,
}

impl CallSpec {
    /// Creates a call spec for `operation`, executed as `procedure`.
    pub fn new(
        operation: impl Into<String>,
        procedure: impl Into<String>,
        shape: ResultShape,
    ) -> Self {
        Self {
            operation: operation.into(),
            procedure: procedure.into(),
            params: Vec::new(),
            shape,
        }
    }

    /// Creates a call spec for a procedure that answers with a row count.
    pub fn non_query(operation: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self::new(operation, procedure, ResultShape::RowsAffected)
    }

    /// Creates a call spec for a procedure that answers with rows.
    pub fn query(operation: impl Into<String>, procedure: impl Into<String>) -> Self {
        Self::new(operation, procedure, ResultShape::Rows)
    }

    /// Appends a parameter declaration.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Returns the operation name (the dispatch key).
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Returns the stored procedure name.
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Returns the result shape.
    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Returns all parameters in declaration order.
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Returns the input parameters in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| !p.is_output())
    }

    /// Returns the output parameters in declaration order.
    pub fn outputs(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.is_output())
    }

    /// Looks up a parameter by name.
    pub fn find(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Checks the call spec for declaration defects.
    pub fn validate(&self) -> MarshalResult<()> {
        if self.operation.is_empty() || self.procedure.is_empty() {
            return Err(MarshalError::InvalidSpec {
                operation: self.operation.clone(),
                reason: "operation and procedure names must not be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for param in &self.params {
            param.validate(&self.operation)?;
            if !seen.insert(param.name.as_str()) {
                return Err(MarshalError::InvalidSpec {
                    operation: self.operation.clone(),
                    reason: format!("parameter {} is declared twice", param.name),
                });
            }
        }

        Ok(())
    }
}
