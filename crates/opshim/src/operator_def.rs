//! Declarative operator definitions and typed argument lookup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declarative description of one operator instance, as the legacy engine stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorDef {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default, rename = "arg")]
    pub args: Vec<Argument>,
}

impl OperatorDef {
    pub fn new<I, O, S, T>(op_type: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        OperatorDef {
            name: String::new(),
            op_type: op_type.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
            args: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: ArgumentValue) -> Self {
        self.args.push(Argument {
            name: name.into(),
            value,
        });
        self
    }

    /// Name used in error messages: the instance name when set, otherwise the type.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.op_type
        } else {
            &self.name
        }
    }
}

/// One named argument; serialized as `{"name": "alpha", "f": 2.0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(flatten)]
    pub value: ArgumentValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgumentValue {
    F(f64),
    I(i64),
    S(String),
    Floats(Vec<f64>),
    Ints(Vec<i64>),
    Strings(Vec<String>),
}

impl ArgumentValue {
    fn field(&self) -> &'static str {
        match self {
            ArgumentValue::F(_) => "f",
            ArgumentValue::I(_) => "i",
            ArgumentValue::S(_) => "s",
            ArgumentValue::Floats(_) => "floats",
            ArgumentValue::Ints(_) => "ints",
            ArgumentValue::Strings(_) => "strings",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ArgumentError {
    #[error("argument {name} holds `{found}`, cannot read it as {expected}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("argument {name} is not a repeated field")]
    NotRepeated { name: String },
    #[error("argument {name} value {value} does not fit {expected}")]
    OutOfRange {
        name: String,
        value: i64,
        expected: &'static str,
    },
}

/// Conversion from a stored argument into a typed value.
pub trait ArgumentType: Sized {
    const TYPE_NAME: &'static str;

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError>;
}

/// Element types allowed inside repeated arguments.
pub trait RepeatedArgumentType: Sized {
    fn from_repeated(name: &str, value: &ArgumentValue) -> Result<Vec<Self>, ArgumentError>;
}

fn mismatch(name: &str, expected: &'static str, value: &ArgumentValue) -> ArgumentError {
    ArgumentError::TypeMismatch {
        name: name.to_string(),
        expected,
        found: value.field(),
    }
}

impl ArgumentType for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        match value {
            ArgumentValue::F(v) => Ok(*v),
            other => Err(mismatch(name, Self::TYPE_NAME, other)),
        }
    }
}

impl ArgumentType for f32 {
    const TYPE_NAME: &'static str = "float";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        f64::from_argument(name, value).map(|v| v as f32)
    }
}

impl ArgumentType for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        match value {
            ArgumentValue::I(v) => Ok(*v),
            other => Err(mismatch(name, Self::TYPE_NAME, other)),
        }
    }
}

impl ArgumentType for i32 {
    const TYPE_NAME: &'static str = "int32";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        let v = i64::from_argument(name, value)?;
        i32::try_from(v).map_err(|_| ArgumentError::OutOfRange {
            name: name.to_string(),
            value: v,
            expected: Self::TYPE_NAME,
        })
    }
}

/// Booleans are stored as integers; only 0 and 1 are accepted.
impl ArgumentType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        match i64::from_argument(name, value) {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(v) => Err(ArgumentError::OutOfRange {
                name: name.to_string(),
                value: v,
                expected: Self::TYPE_NAME,
            }),
            Err(_) => Err(mismatch(name, Self::TYPE_NAME, value)),
        }
    }
}

impl ArgumentType for String {
    const TYPE_NAME: &'static str = "string";

    fn from_argument(name: &str, value: &ArgumentValue) -> Result<Self, ArgumentError> {
        match value {
            ArgumentValue::S(v) => Ok(v.clone()),
            other => Err(mismatch(name, Self::TYPE_NAME, other)),
        }
    }
}

impl RepeatedArgumentType for f64 {
    fn from_repeated(name: &str, value: &ArgumentValue) -> Result<Vec<Self>, ArgumentError> {
        match value {
            ArgumentValue::Floats(v) => Ok(v.clone()),
            other => Err(mismatch(name, "floats", other)),
        }
    }
}

impl RepeatedArgumentType for i64 {
    fn from_repeated(name: &str, value: &ArgumentValue) -> Result<Vec<Self>, ArgumentError> {
        match value {
            ArgumentValue::Ints(v) => Ok(v.clone()),
            other => Err(mismatch(name, "ints", other)),
        }
    }
}

impl RepeatedArgumentType for String {
    fn from_repeated(name: &str, value: &ArgumentValue) -> Result<Vec<Self>, ArgumentError> {
        match value {
            ArgumentValue::Strings(v) => Ok(v.clone()),
            other => Err(mismatch(name, "strings", other)),
        }
    }
}

/// Typed view over the arguments of an [`OperatorDef`].
///
/// When an argument name repeats, the last occurrence wins.
pub struct ArgumentHelper<'a> {
    def: &'a OperatorDef,
}

impl<'a> ArgumentHelper<'a> {
    pub fn new(def: &'a OperatorDef) -> Self {
        ArgumentHelper { def }
    }

    fn find(&self, name: &str) -> Option<&'a ArgumentValue> {
        self.def
            .args
            .iter()
            .rev()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }

    pub fn has_argument(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Reads `name`, returning `Ok(None)` when absent.
    pub fn single_argument<T: ArgumentType>(&self, name: &str) -> Result<Option<T>, ArgumentError> {
        self.find(name)
            .map(|value| T::from_argument(name, value))
            .transpose()
    }

    /// Reads `name`, falling back to `default` when absent. A present but mistyped
    /// argument is an error, never silently replaced by the default.
    pub fn get_single_argument<T: ArgumentType>(
        &self,
        name: &str,
        default: T,
    ) -> Result<T, ArgumentError> {
        Ok(self.single_argument(name)?.unwrap_or(default))
    }

    /// Reads a repeated argument; absent arguments yield an empty list.
    pub fn get_repeated_argument<T: RepeatedArgumentType>(
        &self,
        name: &str,
    ) -> Result<Vec<T>, ArgumentError> {
        match self.find(name) {
            Some(value) => T::from_repeated(name, value),
            None => Ok(Vec::new()),
        }
    }
}
