//! Abstract Syntax Tree types for the chain description language.

use std::collections::HashMap;
use std::fmt;

/// Complete AST representation of a parsed stage chain.
#[derive(Debug, Clone, Default)]
pub struct ChainAst {
    /// Stage instances in signal order
    pub stages: Vec<StageDef>,
    /// Model definitions by name
    pub models: HashMap<String, ModelDef>,
}

impl ChainAst {
    /// Create a new empty chain AST.
    pub fn new() -> Self {
        Self::default()
    }
}

/// A stage instance from the description.
#[derive(Debug, Clone)]
pub struct StageDef {
    /// Stage kind
    pub kind: StageKind,
    /// Unique stage name
    pub name: String,
    /// Reference to a model definition
    pub model_ref: Option<String>,
    /// Parameter overrides in source order
    pub params: Vec<(String, ParamValue)>,
    /// Source line number for error reporting
    pub line: usize,
}

/// A reusable parameter set.
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Model name
    pub name: String,
    /// Kind of stage the model configures
    pub kind: StageKind,
    /// Model parameters in source order
    pub params: Vec<(String, ParamValue)>,
    /// Source line number
    pub line: usize,
}

/// Stage kinds supported by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Diode-pair clipper
    Diode,
    /// Common-collector bipolar stage
    Bjt,
    /// CMOS inverter solved per sample
    Cmos,
    /// CMOS inverter read from a lookup table
    CmosTable,
    /// Push-pull JFET stage
    Jfet,
    /// Closed-form JFET shaper
    Shaper,
    /// Op-amp rail clipper
    OpAmp,
    /// Triode wave digital filter
    Triode,
}

impl StageKind {
    /// Parse a stage kind from a keyword.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "diode" | "d" => Some(Self::Diode),
            "bjt" | "npn" => Some(Self::Bjt),
            "cmos" => Some(Self::Cmos),
            "cmos_table" | "cmos_lut" => Some(Self::CmosTable),
            "jfet" | "njf" => Some(Self::Jfet),
            "shaper" | "jfet_shaper" => Some(Self::Shaper),
            "opamp" | "op" => Some(Self::OpAmp),
            "triode" | "tube" => Some(Self::Triode),
            _ => None,
        }
    }

    /// Canonical keyword.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Diode => "diode",
            Self::Bjt => "bjt",
            Self::Cmos => "cmos",
            Self::CmosTable => "cmos_table",
            Self::Jfet => "jfet",
            Self::Shaper => "shaper",
            Self::OpAmp => "opamp",
            Self::Triode => "triode",
        }
    }

    /// Kind of model this stage accepts. A table is configured like the
    /// stage it tabulates.
    pub fn model_kind(&self) -> Self {
        match self {
            Self::CmosTable => Self::Cmos,
            other => *other,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Right-hand side of a `key=value` pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Numeric value, SI suffix already applied
    Number(f64),
    /// Bare word such as `up` or `ge`
    Ident(String),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Ident(_) => None,
        }
    }

    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Self::Ident(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", v),
            Self::Ident(s) => f.write_str(s),
        }
    }
}
