//! Program model
//!
//! An analog program is a list of named parts, each instantiating an entity
//! type of the target machine, with input bindings that refer to values,
//! coefficients, pseudo parts or outputs of other parts. Observables name
//! readout points and take no part in allocation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::machine::{EntityType, PseudoPart};
use crate::parser::Parser;

/// What a single input port is connected to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBinding", into = "RawBinding")]
pub enum InputBinding {
    Number(f64),
    Bool(bool),
    /// Indirection into the program's coefficient table
    Coefficient(String),
    /// Output port of another part; `None` means its first output
    Reference { part: String, port: Option<String> },
    Pseudo(PseudoPart),
}

impl InputBinding {
    pub fn reference(part: impl Into<String>, port: impl Into<String>) -> Self {
        InputBinding::Reference {
            part: part.into(),
            port: Some(port.into()),
        }
    }

    /// The default output of a part
    pub fn part(part: impl Into<String>) -> Self {
        InputBinding::Reference {
            part: part.into(),
            port: None,
        }
    }

    pub fn coefficient(name: impl Into<String>) -> Self {
        InputBinding::Coefficient(name.into())
    }

    pub fn disconnected() -> Self {
        InputBinding::Pseudo(PseudoPart::Disconnected)
    }
}

impl From<f64> for InputBinding {
    fn from(value: f64) -> Self {
        InputBinding::Number(value)
    }
}

impl From<bool> for InputBinding {
    fn from(value: bool) -> Self {
        InputBinding::Bool(value)
    }
}

impl From<PseudoPart> for InputBinding {
    fn from(value: PseudoPart) -> Self {
        InputBinding::Pseudo(value)
    }
}

impl fmt::Display for InputBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputBinding::Number(n) => write!(f, "{}", n),
            InputBinding::Bool(b) => write!(f, "{}", b),
            InputBinding::Coefficient(name) => write!(f, "${}", name),
            InputBinding::Reference { part, port: Some(port) } => write!(f, "{}:{}", part, port),
            InputBinding::Reference { part, port: None } => write!(f, "{}", part),
            InputBinding::Pseudo(p) => write!(f, "{}", p),
        }
    }
}

impl FromStr for InputBinding {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).parse_binding()
    }
}

/// Document form of a binding: JSON numbers, booleans, notation strings or
/// single-entry `{ "part": "port" }` objects
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawBinding {
    Number(f64),
    Bool(bool),
    Text(String),
    Pin(BTreeMap<String, String>),
}

impl TryFrom<RawBinding> for InputBinding {
    type Error = CompileError;

    fn try_from(raw: RawBinding) -> Result<Self, Self::Error> {
        match raw {
            RawBinding::Number(n) => Ok(InputBinding::Number(n)),
            RawBinding::Bool(b) => Ok(InputBinding::Bool(b)),
            RawBinding::Text(text) => text.parse(),
            RawBinding::Pin(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((part, port)), None) => Ok(InputBinding::reference(part, port)),
                    _ => Err(CompileError::parse_error(
                        "a pin object needs exactly one part: port entry",
                    )),
                }
            }
        }
    }
}

impl From<InputBinding> for RawBinding {
    fn from(binding: InputBinding) -> Self {
        match binding {
            InputBinding::Number(n) => RawBinding::Number(n),
            InputBinding::Bool(b) => RawBinding::Bool(b),
            other => RawBinding::Text(other.to_string()),
        }
    }
}

/// Inputs of a program part, by name or in declared port order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartInputs {
    Named(BTreeMap<String, InputBinding>),
    Positional(Vec<InputBinding>),
}

impl Default for PartInputs {
    fn default() -> Self {
        PartInputs::Named(BTreeMap::new())
    }
}

/// One named instantiation of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramPart {
    pub name: String,
    #[serde(rename = "type")]
    pub entity: String,
    #[serde(default, rename = "input")]
    pub inputs: PartInputs,
    /// Ports named by the builder on a part that binds positionally
    #[serde(skip)]
    mixed: Vec<String>,
}

impl ProgramPart {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            inputs: PartInputs::default(),
            mixed: Vec::new(),
        }
    }

    /// Bind a named input. Naming a port on a positional part is rejected
    /// when the part is checked against its entity type.
    pub fn input(mut self, port: impl Into<String>, binding: impl Into<InputBinding>) -> Self {
        match &mut self.inputs {
            PartInputs::Named(map) => {
                map.insert(port.into(), binding.into());
            }
            PartInputs::Positional(_) => self.mixed.push(port.into()),
        }
        self
    }

    pub fn positional(mut self, bindings: Vec<InputBinding>) -> Self {
        if let PartInputs::Named(map) = &self.inputs {
            self.mixed.extend(map.keys().cloned());
        }
        self.inputs = PartInputs::Positional(bindings);
        self
    }

    /// Inputs keyed by port name, checked against the part's entity type
    pub fn named_inputs(&self, entity: &EntityType) -> CompileResult<BTreeMap<String, InputBinding>> {
        if !self.mixed.is_empty() {
            return Err(CompileError::parse_error(format!(
                "part {} mixes positional inputs with named input {}",
                self.name,
                self.mixed.join(", ")
            )));
        }
        let named = match &self.inputs {
            PartInputs::Named(map) => map.clone(),
            PartInputs::Positional(list) => {
                if list.len() > entity.inputs.len() {
                    return Err(CompileError::parse_error(format!(
                        "part {} lists {} inputs, but type {} has only {}",
                        self.name,
                        list.len(),
                        entity.name,
                        entity.inputs.len()
                    )));
                }
                entity
                    .inputs
                    .iter()
                    .zip(list)
                    .map(|(port, binding)| (port.name.clone(), binding.clone()))
                    .collect()
            }
        };

        for port in named.keys() {
            if entity.input_port(port).is_none() {
                return Err(CompileError::unknown_port(&self.name, &entity.name, port));
            }
        }
        Ok(named)
    }

    fn bindings(&self) -> Box<dyn Iterator<Item = &InputBinding> + '_> {
        match &self.inputs {
            PartInputs::Named(map) => Box::new(map.values()),
            PartInputs::Positional(list) => Box::new(list.iter()),
        }
    }
}

/// A user's analog program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub title: String,
    pub parts: Vec<ProgramPart>,
    #[serde(default)]
    pub coefficients: BTreeMap<String, f64>,
    /// Readout points: name -> part output
    #[serde(default)]
    pub observables: BTreeMap<String, InputBinding>,
}

impl Program {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            parts: Vec::new(),
            coefficients: BTreeMap::new(),
            observables: BTreeMap::new(),
        }
    }

    pub fn from_json(source: &str) -> CompileResult<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn part(mut self, part: ProgramPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn coefficient(mut self, name: impl Into<String>, value: f64) -> Self {
        self.coefficients.insert(name.into(), value);
        self
    }

    pub fn observe(mut self, name: impl Into<String>, target: InputBinding) -> Self {
        self.observables.insert(name.into(), target);
        self
    }

    pub fn find_part(&self, name: &str) -> Option<&ProgramPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// Part names must be unique
    pub fn check_names(&self) -> CompileResult<()> {
        let mut seen = BTreeSet::new();
        for part in &self.parts {
            if !seen.insert(part.name.as_str()) {
                return Err(CompileError::DuplicateName {
                    name: part.name.clone(),
                    context: format!("program {}", self.title),
                });
            }
        }
        Ok(())
    }

    /// Output ports of `part` referenced anywhere in the program, including
    /// observables. A reference without port names `default_output`.
    pub fn referenced_outputs(&self, part: &str, default_output: Option<&str>) -> BTreeSet<String> {
        let all = self
            .parts
            .iter()
            .flat_map(|p| p.bindings())
            .chain(self.observables.values());

        let mut used = BTreeSet::new();
        for binding in all {
            if let InputBinding::Reference { part: target, port } = binding {
                if target != part || (port.is_none() && self.coefficients.contains_key(target)) {
                    continue;
                }
                match port {
                    Some(port) => {
                        used.insert(port.clone());
                    }
                    None => {
                        if let Some(default) = default_output {
                            used.insert(default.to_string());
                        }
                    }
                }
            }
        }
        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{InputPort, OutputPort};
    use pretty_assertions::assert_eq;

    fn summer() -> EntityType {
        EntityType::primitive("SUM")
            .input(InputPort::analog("a"))
            .input(InputPort::numeric("alpha"))
            .output(OutputPort::analog("o"))
    }

    #[test]
    fn test_binding_notation() {
        assert_eq!("S1:o".parse::<InputBinding>().unwrap(), InputBinding::reference("S1", "o"));
        assert_eq!("S1".parse::<InputBinding>().unwrap(), InputBinding::part("S1"));
        assert_eq!("+1".parse::<InputBinding>().unwrap(), InputBinding::Pseudo(PseudoPart::PlusOne));
        assert_eq!("0.25".parse::<InputBinding>().unwrap(), InputBinding::Number(0.25));
        assert_eq!("$k".parse::<InputBinding>().unwrap(), InputBinding::coefficient("k"));
    }

    #[test]
    fn test_program_document() {
        let source = r#"{
            "title": "decay",
            "parts": [
                {"name": "S1", "type": "SUM", "input": {"a": "-1", "alpha": 0.5}},
                {"name": "S2", "type": "SUM", "input": ["S1", "k"]}
            ],
            "coefficients": {"k": 0.1},
            "observables": {"x": {"S2": "o"}}
        }"#;
        let program = Program::from_json(source).unwrap();
        assert_eq!(program.parts.len(), 2);
        assert_eq!(program.observables["x"], InputBinding::reference("S2", "o"));

        let named = program.parts[1].named_inputs(&summer()).unwrap();
        assert_eq!(named["a"], InputBinding::part("S1"));
        assert_eq!(named["alpha"], InputBinding::part("k"));
    }

    #[test]
    fn test_too_many_positional_inputs() {
        let part = ProgramPart::new("S1", "SUM").positional(vec![
            InputBinding::part("X"),
            InputBinding::Number(0.1),
            InputBinding::Number(0.2),
        ]);
        assert!(part.named_inputs(&summer()).is_err());
    }

    #[test]
    fn test_named_input_on_positional_part() {
        let part = ProgramPart::new("S1", "SUM")
            .positional(vec![InputBinding::part("X")])
            .input("alpha", 0.5);
        let err = part.named_inputs(&summer()).unwrap_err();
        assert!(matches!(err, CompileError::ParseError { .. }));
        assert!(err.to_string().contains("alpha"));

        let part = ProgramPart::new("S1", "SUM")
            .input("alpha", 0.5)
            .positional(vec![InputBinding::part("X")]);
        assert!(part.named_inputs(&summer()).is_err());
    }

    #[test]
    fn test_unknown_input_port() {
        let part = ProgramPart::new("S1", "SUM").input("zz", 0.5);
        let err = part.named_inputs(&summer()).unwrap_err();
        assert!(matches!(err, CompileError::UnknownPort { .. }));
    }

    #[test]
    fn test_referenced_outputs() {
        let program = Program::new("t")
            .part(ProgramPart::new("I1", "INT2pm"))
            .part(ProgramPart::new("S1", "SUM").input("a", InputBinding::part("I1")))
            .observe("y", InputBinding::reference("I1", "inv"));
        let used = program.referenced_outputs("I1", Some("o"));
        assert_eq!(used, BTreeSet::from(["o".to_string(), "inv".to_string()]));
    }

    #[test]
    fn test_duplicate_part_names() {
        let program = Program::new("t")
            .part(ProgramPart::new("S1", "SUM"))
            .part(ProgramPart::new("S1", "SUM"));
        assert!(matches!(program.check_names(), Err(CompileError::DuplicateName { .. })));
    }
}
