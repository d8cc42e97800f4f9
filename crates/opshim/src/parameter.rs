//! Statically declared operator parameters.
//!
//! An adapter declares its parameters as a `&'static [ParameterDef]`. The list is parsed
//! once from the operator definition when the adapter is constructed, and the resulting
//! [`ParameterSet`] is pushed onto every call stack between the inputs and the outputs.

use anyhow::Result;

use crate::adapter::ConfigError;
use crate::ivalue::{IValue, IValueKind};
use crate::operator_def::{ArgumentHelper, RepeatedArgumentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
    String,
    Ints,
    Floats,
}

impl ParamKind {
    /// Stack kind a parameter of this kind is boxed into.
    pub fn ivalue_kind(self) -> IValueKind {
        match self {
            ParamKind::Float => IValueKind::Double,
            ParamKind::Int => IValueKind::Int,
            ParamKind::Bool => IValueKind::Bool,
            ParamKind::String => IValueKind::String,
            ParamKind::Ints => IValueKind::IntList,
            ParamKind::Floats => IValueKind::DoubleList,
        }
    }
}

/// Literal default usable in `const` parameter lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Float(f64),
    Int(i64),
    Bool(bool),
    Str(&'static str),
    Ints(&'static [i64]),
    Floats(&'static [f64]),
}

impl ParamDefault {
    const fn kind(self) -> ParamKind {
        match self {
            ParamDefault::Float(_) => ParamKind::Float,
            ParamDefault::Int(_) => ParamKind::Int,
            ParamDefault::Bool(_) => ParamKind::Bool,
            ParamDefault::Str(_) => ParamKind::String,
            ParamDefault::Ints(_) => ParamKind::Ints,
            ParamDefault::Floats(_) => ParamKind::Floats,
        }
    }

    fn to_ivalue(self) -> IValue {
        match self {
            ParamDefault::Float(v) => IValue::Double(v),
            ParamDefault::Int(v) => IValue::Int(v),
            ParamDefault::Bool(v) => IValue::Bool(v),
            ParamDefault::Str(v) => IValue::String(v.to_string()),
            ParamDefault::Ints(v) => IValue::IntList(v.to_vec()),
            ParamDefault::Floats(v) => IValue::DoubleList(v.to_vec()),
        }
    }
}

/// A named, typed parameter with an optional default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDef {
    name: &'static str,
    kind: ParamKind,
    default: Option<ParamDefault>,
}

impl ParameterDef {
    /// Parameter that must be present in the operator definition.
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        ParameterDef {
            name,
            kind,
            default: None,
        }
    }

    pub const fn float(name: &'static str, default: f64) -> Self {
        Self::with_default(name, ParamDefault::Float(default))
    }

    pub const fn int(name: &'static str, default: i64) -> Self {
        Self::with_default(name, ParamDefault::Int(default))
    }

    pub const fn bool(name: &'static str, default: bool) -> Self {
        Self::with_default(name, ParamDefault::Bool(default))
    }

    pub const fn string(name: &'static str, default: &'static str) -> Self {
        Self::with_default(name, ParamDefault::Str(default))
    }

    pub const fn ints(name: &'static str, default: &'static [i64]) -> Self {
        Self::with_default(name, ParamDefault::Ints(default))
    }

    pub const fn floats(name: &'static str, default: &'static [f64]) -> Self {
        Self::with_default(name, ParamDefault::Floats(default))
    }

    const fn with_default(name: &'static str, default: ParamDefault) -> Self {
        ParameterDef {
            name,
            kind: default.kind(),
            default: Some(default),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn default_value(&self) -> Option<ParamDefault> {
        self.default
    }

    /// Extracts this parameter from the operator's arguments, falling back to the default.
    pub fn parse(&self, op: &str, helper: &ArgumentHelper<'_>) -> Result<IValue> {
        let parsed = match self.kind {
            ParamKind::Float => helper.single_argument::<f64>(self.name)?.map(IValue::Double),
            ParamKind::Int => helper.single_argument::<i64>(self.name)?.map(IValue::Int),
            ParamKind::Bool => helper.single_argument::<bool>(self.name)?.map(IValue::Bool),
            ParamKind::String => helper
                .single_argument::<String>(self.name)?
                .map(IValue::String),
            ParamKind::Ints => self.repeated::<i64>(helper)?.map(IValue::IntList),
            ParamKind::Floats => self.repeated::<f64>(helper)?.map(IValue::DoubleList),
        };
        match parsed.or_else(|| self.default.map(ParamDefault::to_ivalue)) {
            Some(value) => Ok(value),
            None => Err(ConfigError::MissingParameter {
                op: op.to_string(),
                name: self.name.to_string(),
            }
            .into()),
        }
    }

    fn repeated<T: RepeatedArgumentType>(
        &self,
        helper: &ArgumentHelper<'_>,
    ) -> Result<Option<Vec<T>>> {
        if helper.has_argument(self.name) {
            Ok(Some(helper.get_repeated_argument::<T>(self.name)?))
        } else {
            Ok(None)
        }
    }
}

/// Parsed parameter values, in declaration order. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    defs: &'static [ParameterDef],
    values: Vec<IValue>,
}

impl ParameterSet {
    pub fn parse(
        op: &str,
        defs: &'static [ParameterDef],
        helper: &ArgumentHelper<'_>,
    ) -> Result<Self> {
        let values = defs
            .iter()
            .map(|def| def.parse(op, helper))
            .collect::<Result<Vec<_>>>()?;
        Ok(ParameterSet { defs, values })
    }

    pub fn empty() -> Self {
        ParameterSet {
            defs: &[],
            values: Vec::new(),
        }
    }

    pub fn defs(&self) -> &'static [ParameterDef] {
        self.defs
    }

    pub fn values(&self) -> &[IValue] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&IValue> {
        self.defs
            .iter()
            .position(|def| def.name == name)
            .map(|index| &self.values[index])
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
