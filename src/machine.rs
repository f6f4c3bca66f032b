//! Machine description model
//!
//! A machine description is the analog computer's "library": the catalog of
//! computing element types ([`EntityType`]), the concrete configurable slots
//! that instantiate them ([`ConfigurablePart`]), and the hard-wired
//! peripherals ([`WiredPart`]) whose enumerations bind physical offsets to
//! logical `part:port` names.
//!
//! Descriptions are loaded once, validated once with [`Machine::validate`],
//! and treated as immutable afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::parser::Parser;
use crate::program::InputBinding;

/// Default resolution of the digital potentiometers
pub const DEFAULT_RESOLUTION_BITS: u32 = 10;

/// Widest potentiometer whose settings fit the 4-digit decimal field of the
/// controller's `P` command
pub const MAX_RESOLUTION_BITS: u32 = 13;

/// Kind of a computing element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Primitive,
    Macro,
    /// Fixed resources such as external inputs; never allocated
    Pseudo,
}

/// Signal kind carried by a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Analog,
    Digital,
    Numeric,
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortKind::Analog => write!(f, "analog"),
            PortKind::Digital => write!(f, "digital"),
            PortKind::Numeric => write!(f, "numeric"),
        }
    }
}

/// Range of the potentiometer fraction a numeric port can represent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: f64,
    pub max: f64,
}

impl NumericRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl Default for NumericRange {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

fn default_weight() -> f64 {
    1.0
}

fn is_unit_weight(weight: &f64) -> bool {
    *weight == 1.0
}

/// An input port of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    pub kind: PortKind,
    /// Fixed gain in front of the potentiometer (1 for unit inputs, 10 for
    /// decade inputs). Only meaningful for numeric ports.
    #[serde(default = "default_weight", skip_serializing_if = "is_unit_weight")]
    pub weight: f64,
    #[serde(default)]
    pub range: NumericRange,
}

impl InputPort {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            name: name.into(),
            kind,
            weight: 1.0,
            range: NumericRange::default(),
        }
    }

    pub fn analog(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Analog)
    }

    pub fn digital(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Digital)
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Numeric)
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// An output port of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    pub kind: PortKind,
}

impl OutputPort {
    pub fn analog(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Analog,
        }
    }

    pub fn digital(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Digital,
        }
    }
}

/// Wiring of one input of a macro's internal sub-part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacroWire {
    /// The macro's own declared input
    Input(String),
    /// Output of a sibling sub-part
    Sibling(PortRef),
    /// A value fixed by the machine (number, boolean or pseudo part)
    Fixed(InputBinding),
}

/// A named sub-instance inside a macro
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroPart {
    pub name: String,
    #[serde(rename = "type")]
    pub entity: String,
    #[serde(default, rename = "input")]
    pub inputs: BTreeMap<String, MacroWire>,
}

impl MacroPart {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            inputs: BTreeMap::new(),
        }
    }

    pub fn wire(mut self, port: impl Into<String>, wire: MacroWire) -> Self {
        self.inputs.insert(port.into(), wire);
        self
    }
}

/// Side condition of an is-a relation, always stated on the declaring type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    /// The declaring type's output must not be referenced
    OutputUnused(String),
    /// The declaring type's input must carry exactly this binding
    InputEquals { port: String, value: InputBinding },
}

/// Declared substitutability between two entity types.
///
/// `A.is_a = [B]` lets an `A` slot stand in for a requested `B` (the
/// requirement values are injected into the slot), and lets a requested `A`
/// be realized on a `B` slot when the program satisfies the requirements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsA {
    pub target: String,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    /// Port renames from the declaring type to the target type
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
}

impl IsA {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            requires: Vec::new(),
            ports: BTreeMap::new(),
        }
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    /// Target type's name for one of the declaring type's ports
    pub fn to_target<'a>(&'a self, port: &'a str) -> &'a str {
        self.ports.get(port).map(String::as_str).unwrap_or(port)
    }

    /// Declaring type's name for one of the target type's ports
    pub fn to_declaring<'a>(&'a self, port: &'a str) -> &'a str {
        self.ports
            .iter()
            .find(|(_, target)| target.as_str() == port)
            .map(|(own, _)| own.as_str())
            .unwrap_or(port)
    }
}

/// A computing element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    pub name: String,
    pub kind: EntityKind,
    /// Human-readable formula, informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    #[serde(default)]
    pub default_inputs: BTreeMap<String, InputBinding>,
    /// Internal part list (macros only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MacroPart>,
    /// Macro outputs mapped to sub-part outputs (macros only)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, PortRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub is_a: Vec<IsA>,
}

impl EntityType {
    fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            formula: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            default_inputs: BTreeMap::new(),
            parts: Vec::new(),
            exports: BTreeMap::new(),
            is_a: Vec::new(),
        }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Primitive)
    }

    pub fn macro_type(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Macro)
    }

    pub fn pseudo(name: impl Into<String>) -> Self {
        Self::new(name, EntityKind::Pseudo)
    }

    pub fn formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn default_input(mut self, port: impl Into<String>, value: impl Into<InputBinding>) -> Self {
        self.default_inputs.insert(port.into(), value.into());
        self
    }

    pub fn part(mut self, part: MacroPart) -> Self {
        self.parts.push(part);
        self
    }

    pub fn export(mut self, output: impl Into<String>, from: PortRef) -> Self {
        self.exports.insert(output.into(), from);
        self
    }

    pub fn is_a(mut self, relation: IsA) -> Self {
        self.is_a.push(relation);
        self
    }

    pub fn is_macro(&self) -> bool {
        self.kind == EntityKind::Macro
    }

    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output_port(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// The implicit output used when a reference names no port
    pub fn default_output(&self) -> Option<&OutputPort> {
        self.outputs.first()
    }

    pub fn sub_part(&self, name: &str) -> Option<&MacroPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    /// The is-a relation this type declares towards `target`, if any
    pub fn relation_to(&self, target: &str) -> Option<&IsA> {
        self.is_a.iter().find(|r| r.target == target)
    }
}

fn default_allocatable() -> bool {
    true
}

/// A physical slot instantiating an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurablePart {
    pub name: String,
    #[serde(rename = "type")]
    pub entity: String,
    /// Readout addresses per output port
    #[serde(default)]
    pub address: BTreeMap<String, u16>,
    #[serde(default = "default_allocatable")]
    pub allocatable: bool,
}

impl ConfigurablePart {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            address: BTreeMap::new(),
            allocatable: true,
        }
    }

    pub fn address(mut self, port: impl Into<String>, address: u16) -> Self {
        self.address.insert(port.into(), address);
        self
    }

    pub fn fixed(mut self) -> Self {
        self.allocatable = false;
        self
    }
}

/// How a crossbar expects its configuration word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrossbarEncoding {
    /// The row-major one-hot hexstream
    #[default]
    OneHot,
    /// Enable bit plus column index per row, last row first
    Ad8113,
}

/// An N×M analog switch matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossbar {
    pub name: String,
    pub address: u16,
    #[serde(default)]
    pub encoding: CrossbarEncoding,
    pub input_columns: Vec<Pin>,
    pub output_rows: Vec<Pin>,
}

impl Crossbar {
    pub fn new(name: impl Into<String>, address: u16, input_columns: Vec<Pin>, output_rows: Vec<Pin>) -> Self {
        Self {
            name: name.into(),
            address,
            encoding: CrossbarEncoding::OneHot,
            input_columns,
            output_rows,
        }
    }

    pub fn with_encoding(mut self, encoding: CrossbarEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

fn default_resolution() -> u32 {
    DEFAULT_RESOLUTION_BITS
}

/// A bank of digital potentiometers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentiometerBank {
    pub name: String,
    pub address: u16,
    pub size: usize,
    #[serde(default = "default_resolution")]
    pub resolution_bits: u32,
    pub enumeration: Vec<Pin>,
}

impl PotentiometerBank {
    pub fn new(name: impl Into<String>, address: u16, size: usize, enumeration: Vec<Pin>) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            resolution_bits: DEFAULT_RESOLUTION_BITS,
            enumeration,
        }
    }
}

fn default_controller_size() -> usize {
    8
}

/// The hybrid controller: its own potentiometers plus digital I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub address: u16,
    #[serde(default = "default_controller_size")]
    pub size: usize,
    #[serde(default = "default_resolution")]
    pub resolution_bits: u32,
    #[serde(default)]
    pub potentiometers: Vec<Pin>,
    #[serde(default)]
    pub digital_outputs: Vec<Pin>,
    #[serde(default)]
    pub digital_inputs: Vec<Pin>,
}

impl Controller {
    pub fn new(name: impl Into<String>, address: u16) -> Self {
        Self {
            name: name.into(),
            address,
            size: default_controller_size(),
            resolution_bits: DEFAULT_RESOLUTION_BITS,
            potentiometers: Vec::new(),
            digital_outputs: Vec::new(),
            digital_inputs: Vec::new(),
        }
    }
}

/// A hard-wired peripheral
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WiredPart {
    #[serde(rename = "XBAR")]
    Crossbar(Crossbar),
    #[serde(rename = "DPT")]
    PotentiometerBank(PotentiometerBank),
    #[serde(rename = "HC")]
    Controller(Controller),
}

impl WiredPart {
    pub fn name(&self) -> &str {
        match self {
            WiredPart::Crossbar(x) => &x.name,
            WiredPart::PotentiometerBank(p) => &p.name,
            WiredPart::Controller(c) => &c.name,
        }
    }
}

/// Pseudo parts are referenced like ordinary parts but are no computing
/// elements: they are never allocated and always available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PseudoPart {
    Disconnected,
    PlusOne,
    MinusOne,
}

impl fmt::Display for PseudoPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PseudoPart::Disconnected => write!(f, "None"),
            PseudoPart::PlusOne => write!(f, "+1"),
            PseudoPart::MinusOne => write!(f, "-1"),
        }
    }
}

/// A fully qualified port: instance path plus port name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub part: String,
    pub port: String,
}

impl PortRef {
    pub fn new(part: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            part: part.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.part, self.port)
    }
}

/// A primitive-level signal source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Endpoint {
    Port(PortRef),
    Pseudo(PseudoPart),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Port(p) => write!(f, "{}", p),
            Endpoint::Pseudo(p) => write!(f, "{}", p),
        }
    }
}

/// A machine-side name as written in enumerations, e.g. `SUM0:a`, `IP0/int:k`
/// or `+1`. A missing port means the part's first output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Pin {
    Port { part: String, port: Option<String> },
    Pseudo(PseudoPart),
}

impl Pin {
    pub fn port(part: impl Into<String>, port: impl Into<String>) -> Self {
        Pin::Port {
            part: part.into(),
            port: Some(port.into()),
        }
    }

    /// The default output of a part
    pub fn output(part: impl Into<String>) -> Self {
        Pin::Port {
            part: part.into(),
            port: None,
        }
    }

    pub fn unused() -> Self {
        Pin::Pseudo(PseudoPart::Disconnected)
    }

    pub fn is_unused(&self) -> bool {
        matches!(self, Pin::Pseudo(PseudoPart::Disconnected))
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pin::Port { part, port: Some(port) } => write!(f, "{}:{}", part, port),
            Pin::Port { part, port: None } => write!(f, "{}", part),
            Pin::Pseudo(p) => write!(f, "{}", p),
        }
    }
}

impl FromStr for Pin {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).parse_pin()
    }
}

impl TryFrom<String> for Pin {
    type Error = CompileError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.to_string()
    }
}

/// A complete target architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub title: String,
    pub entities: Vec<EntityType>,
    pub configurable_parts: Vec<ConfigurablePart>,
    pub wired_parts: Vec<WiredPart>,
}

impl Machine {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entities: Vec::new(),
            configurable_parts: Vec::new(),
            wired_parts: Vec::new(),
        }
    }

    /// Load a machine description from JSON and validate it
    pub fn from_json(source: &str) -> CompileResult<Self> {
        let machine: Machine = serde_json::from_str(source)?;
        machine.validate()?;
        Ok(machine)
    }

    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn configurable_part(&self, name: &str) -> Option<&ConfigurablePart> {
        self.configurable_parts.iter().find(|p| p.name == name)
    }

    /// Look up an entity type, failing with context for error messages
    pub fn require_entity(&self, name: &str, context: impl Into<String>) -> CompileResult<&EntityType> {
        self.entity(name)
            .ok_or_else(|| CompileError::unknown_entity(name, context))
    }

    /// Slots that may receive a program part, in declaration order
    pub fn allocatable_parts(&self) -> impl Iterator<Item = &ConfigurablePart> {
        self.configurable_parts.iter().filter(move |p| {
            p.allocatable
                && self
                    .entity(&p.entity)
                    .map(|e| e.kind != EntityKind::Pseudo)
                    .unwrap_or(false)
        })
    }

    /// Static consistency check of the description, independent of any
    /// program. Run once at load time.
    pub fn validate(&self) -> CompileResult<()> {
        let mut names = BTreeSet::new();
        for entity in &self.entities {
            if !names.insert(entity.name.as_str()) {
                return Err(CompileError::DuplicateName {
                    name: entity.name.clone(),
                    context: "entity catalog".to_string(),
                });
            }
        }

        for entity in &self.entities {
            self.validate_entity(entity)?;
        }
        self.check_macro_recursion()?;

        let mut names = BTreeSet::new();
        for part in &self.configurable_parts {
            if !names.insert(part.name.as_str()) {
                return Err(CompileError::DuplicateName {
                    name: part.name.clone(),
                    context: "configurable parts".to_string(),
                });
            }
            let entity = self.require_entity(&part.entity, format!("configurable part {}", part.name))?;
            for port in part.address.keys() {
                if entity.output_port(port).is_none() {
                    return Err(CompileError::unknown_port(&part.name, &entity.name, port));
                }
            }
        }

        let mut names = BTreeSet::new();
        for wired in &self.wired_parts {
            if !names.insert(wired.name()) {
                return Err(CompileError::DuplicateName {
                    name: wired.name().to_string(),
                    context: "wired parts".to_string(),
                });
            }
            match wired {
                WiredPart::Crossbar(xbar) => {
                    if xbar.input_columns.is_empty() || xbar.output_rows.is_empty() {
                        return Err(CompileError::malformed(format!(
                            "crossbar {} needs at least one row and one column",
                            xbar.name
                        )));
                    }
                }
                WiredPart::PotentiometerBank(bank) => {
                    check_capacity(&bank.name, "potentiometers", bank.enumeration.len(), bank.size)?;
                    check_resolution(&bank.name, bank.resolution_bits)?;
                }
                WiredPart::Controller(hc) => {
                    check_capacity(&hc.name, "potentiometers", hc.potentiometers.len(), hc.size)?;
                    check_capacity(&hc.name, "digital outputs", hc.digital_outputs.len(), hc.size)?;
                    check_capacity(&hc.name, "digital inputs", hc.digital_inputs.len(), hc.size)?;
                    check_resolution(&hc.name, hc.resolution_bits)?;
                }
            }
        }

        Ok(())
    }

    fn validate_entity(&self, entity: &EntityType) -> CompileResult<()> {
        for port in entity.default_inputs.keys() {
            if entity.input_port(port).is_none() {
                return Err(CompileError::unknown_port("<defaults>", &entity.name, port));
            }
        }
        for port in &entity.inputs {
            if port.kind == PortKind::Numeric && !(port.weight > 0.0 && port.range.min < port.range.max) {
                return Err(CompileError::malformed(format!(
                    "entity {}: numeric input {} needs a positive weight and a non-empty range",
                    entity.name, port.name
                )));
            }
        }

        for relation in &entity.is_a {
            let target = self.require_entity(&relation.target, format!("is-a relation of {}", entity.name))?;
            for requirement in &relation.requires {
                let known = match requirement {
                    Requirement::OutputUnused(port) => entity.output_port(port).is_some(),
                    Requirement::InputEquals { port, .. } => entity.input_port(port).is_some(),
                };
                if !known {
                    return Err(CompileError::malformed(format!(
                        "entity {}: is-a {} requirement names an undeclared port",
                        entity.name, target.name
                    )));
                }
            }

            let mut renamed = BTreeSet::new();
            for (own, other) in &relation.ports {
                let matching = (entity.input_port(own).is_some() && target.input_port(other).is_some())
                    || (entity.output_port(own).is_some() && target.output_port(other).is_some());
                if !matching {
                    return Err(CompileError::malformed(format!(
                        "entity {}: is-a {} maps {} to {}, which are not ports of the same direction",
                        entity.name, target.name, own, other
                    )));
                }
            }
            // unmapped ports keep their name, so they take part in the check
            let own_ports = entity
                .inputs
                .iter()
                .map(|p| p.name.as_str())
                .chain(entity.outputs.iter().map(|p| p.name.as_str()));
            for own in own_ports {
                let other = relation.to_target(own);
                let exists = target.input_port(other).is_some() || target.output_port(other).is_some();
                if exists && !renamed.insert(other) {
                    return Err(CompileError::malformed(format!(
                        "entity {}: is-a {} maps two ports onto {}",
                        entity.name, target.name, other
                    )));
                }
            }
        }

        if !entity.is_macro() {
            if !entity.parts.is_empty() || !entity.exports.is_empty() {
                return Err(CompileError::malformed(format!(
                    "entity {} declares internal parts but is not a macro",
                    entity.name
                )));
            }
            return Ok(());
        }

        let mut names = BTreeSet::new();
        for sub in &entity.parts {
            if !names.insert(sub.name.as_str()) {
                return Err(CompileError::DuplicateName {
                    name: sub.name.clone(),
                    context: format!("macro {}", entity.name),
                });
            }
            let sub_entity = self.require_entity(&sub.entity, format!("macro {} part {}", entity.name, sub.name))?;
            for (port, wire) in &sub.inputs {
                if sub_entity.input_port(port).is_none() {
                    return Err(CompileError::unresolved(&entity.name, format!("{}:{}", sub.name, port)));
                }
                match wire {
                    MacroWire::Input(name) => {
                        if entity.input_port(name).is_none() {
                            return Err(CompileError::unresolved(
                                &entity.name,
                                format!("{}:{} <- undeclared input {}", sub.name, port, name),
                            ));
                        }
                    }
                    MacroWire::Sibling(source) => self.check_sibling(entity, source)?,
                    MacroWire::Fixed(InputBinding::Reference { .. }) => {
                        return Err(CompileError::unresolved(
                            &entity.name,
                            format!("{}:{} is fixed to a part reference", sub.name, port),
                        ));
                    }
                    MacroWire::Fixed(_) => {}
                }
            }
            for port in &sub_entity.inputs {
                if !sub.inputs.contains_key(&port.name) && !sub_entity.default_inputs.contains_key(&port.name) {
                    return Err(CompileError::unresolved(
                        &entity.name,
                        format!("{}:{} is neither wired nor defaulted", sub.name, port.name),
                    ));
                }
            }
        }

        for output in &entity.outputs {
            let source = entity.exports.get(&output.name).ok_or_else(|| {
                CompileError::unresolved(&entity.name, format!("output {} is not exported", output.name))
            })?;
            self.check_sibling(entity, source)?;
        }

        Ok(())
    }

    fn check_sibling(&self, entity: &EntityType, source: &PortRef) -> CompileResult<()> {
        let resolves = entity
            .sub_part(&source.part)
            .and_then(|sub| self.entity(&sub.entity))
            .map(|sub_entity| sub_entity.output_port(&source.port).is_some())
            .unwrap_or(false);
        if resolves {
            Ok(())
        } else {
            Err(CompileError::unresolved(&entity.name, source.to_string()))
        }
    }

    /// Reject macros that (transitively) contain themselves
    fn check_macro_recursion(&self) -> CompileResult<()> {
        for root in self.entities.iter().filter(|e| e.is_macro()) {
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(root.name.as_str(), vec![root.name.as_str()])];
            while let Some((name, trail)) = stack.pop() {
                let Some(entity) = self.entity(name) else { continue };
                for sub in &entity.parts {
                    if trail.contains(&sub.entity.as_str()) {
                        return Err(CompileError::malformed(format!(
                            "macro {} contains itself via {} -> {}",
                            root.name,
                            trail.join(" -> "),
                            sub.entity
                        )));
                    }
                    let mut next = trail.clone();
                    next.push(sub.entity.as_str());
                    stack.push((sub.entity.as_str(), next));
                }
            }
        }
        Ok(())
    }
}

fn check_capacity(name: &str, what: &str, used: usize, size: usize) -> CompileResult<()> {
    if used > size {
        return Err(CompileError::malformed(format!(
            "{} has only {} {}, but {} are enumerated",
            name, size, what, used
        )));
    }
    Ok(())
}

fn check_resolution(name: &str, bits: u32) -> CompileResult<()> {
    if bits == 0 || bits > MAX_RESOLUTION_BITS {
        return Err(CompileError::malformed(format!(
            "{}: potentiometer resolution of {} bits is not supported",
            name, bits
        )));
    }
    Ok(())
}
