//! Macro expansion and binding resolution
//!
//! Turns an allocation into a flat circuit of primitive instances. Program
//! bindings are resolved to primitive-level sources (through macro exports),
//! macro slots are unfolded into their internal parts with a worklist, and
//! every primitive input ends up as exactly one of:
//!
//! - a [`Net`] from a source endpoint (to be routed or hard-wired)
//! - a [`Setting`] holding a number or boolean (for potentiometers and
//!   digital outputs)
//! - nothing, when it is disconnected

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::allocator::{Allocation, Placement};
use crate::error::{CompileError, CompileResult};
use crate::layout::{resolve_output, ResolvedOutput};
use crate::machine::{EntityKind, EntityType, Endpoint, Machine, MacroWire, NumericRange, PortKind, PortRef, PseudoPart};
use crate::program::{InputBinding, Program};
use crate::trace::{CompileTrace, TraceEvent};

/// Who asked for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// A binding written in the program; must be realized
    Program,
    /// Macro internals and machine defaults
    Machine,
}

/// One primitive computing element of the expanded circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveInstance {
    /// Instance path: the slot name, or `SLOT/sub` inside macros
    pub path: String,
    pub entity: String,
    /// Program part this instance realizes
    pub part: String,
}

/// A source endpoint feeding one primitive input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub source: Endpoint,
    pub destination: PortRef,
    pub provenance: Provenance,
    /// Program part and port label for diagnostics
    pub part: String,
    pub port: String,
}

impl Net {
    /// A program-level net, labelled by its destination
    pub fn new(source: Endpoint, destination: PortRef) -> Self {
        Self {
            part: destination.part.clone(),
            port: destination.port.clone(),
            source,
            destination,
            provenance: Provenance::Program,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingValue {
    Number(f64),
    Bool(bool),
}

/// A static value for a numeric or digital primitive input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub destination: PortRef,
    pub value: SettingValue,
    /// Coefficient name the value came from, if any
    pub coefficient: Option<String>,
    pub provenance: Provenance,
    pub part: String,
    pub port: String,
}

/// The flat primitive circuit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpandedCircuit {
    pub instances: Vec<PrimitiveInstance>,
    pub nets: Vec<Net>,
    pub settings: Vec<Setting>,
}

impl ExpandedCircuit {
    pub fn instance(&self, path: &str) -> Option<&PrimitiveInstance> {
        self.instances.iter().find(|i| i.path == path)
    }
}

/// A binding after resolution against the allocation
#[derive(Debug, Clone, PartialEq)]
enum Signal {
    Source { endpoint: Endpoint, kind: PortKind },
    Number { value: f64, coefficient: Option<String> },
    Bool(bool),
    Disconnected,
}

impl Signal {
    fn describe(&self) -> String {
        match self {
            Signal::Source { endpoint, kind } => format!("{} signal from {}", kind, endpoint),
            Signal::Number { value, .. } => format!("number {}", value),
            Signal::Bool(b) => format!("boolean {}", b),
            Signal::Disconnected => "None".to_string(),
        }
    }

    /// A value fixed by the machine description
    fn literal(binding: &InputBinding, context: &str) -> CompileResult<Self> {
        match binding {
            InputBinding::Number(value) => Ok(Signal::Number {
                value: *value,
                coefficient: None,
            }),
            InputBinding::Bool(b) => Ok(Signal::Bool(*b)),
            InputBinding::Pseudo(PseudoPart::Disconnected) => Ok(Signal::Disconnected),
            InputBinding::Pseudo(p) => Ok(Signal::Source {
                endpoint: Endpoint::Pseudo(*p),
                kind: PortKind::Analog,
            }),
            other => Err(CompileError::malformed(format!(
                "{}: machine-side value {} must be a literal",
                context, other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct Bound {
    signal: Signal,
    provenance: Provenance,
    label: String,
}

impl Bound {
    fn source_label(&self) -> String {
        format!("{} via {}", self.signal.describe(), self.label)
    }
}

/// An instance waiting to be expanded
struct Pending {
    path: String,
    entity: String,
    part: String,
    bindings: BTreeMap<String, Bound>,
}

/// A program reference resolved down to the machine
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedReference {
    /// Configurable part holding the source
    pub slot: String,
    /// Output port on that configurable part
    pub slot_port: String,
    pub output: ResolvedOutput,
}

/// Resolve `part:port` as written in a program. `part` is either a program
/// part (looked up through the allocation) or a fixed machine resource such
/// as an external input.
pub fn resolve_reference(
    machine: &Machine,
    allocation: &Allocation,
    part: &str,
    port: Option<&str>,
    context: &str,
) -> CompileResult<ResolvedReference> {
    let (slot, requested, realized_entity, placement): (&str, &EntityType, &EntityType, Option<&Placement>) =
        match allocation.placement(part) {
            Some(placement) => (
                placement.slot.as_str(),
                machine.require_entity(&placement.entity, format!("program part {}", part))?,
                machine.require_entity(&placement.slot_entity, format!("configurable part {}", placement.slot))?,
                Some(placement),
            ),
            None => {
                let fixed = machine
                    .configurable_part(part)
                    .filter(|p| {
                        !p.allocatable
                            || machine
                                .entity(&p.entity)
                                .map(|e| e.kind == EntityKind::Pseudo)
                                .unwrap_or(false)
                    })
                    .ok_or_else(|| CompileError::unknown_part(part, context))?;
                let entity = machine.require_entity(&fixed.entity, format!("configurable part {}", fixed.name))?;
                (fixed.name.as_str(), entity, entity, None)
            }
        };

    let port = match port {
        Some(port) => port.to_string(),
        None => requested
            .default_output()
            .map(|o| o.name.clone())
            .ok_or_else(|| CompileError::unknown_port(part, &requested.name, "<output>"))?,
    };
    if requested.output_port(&port).is_none() {
        return Err(CompileError::unknown_port(part, &requested.name, &port));
    }

    let slot_port = match placement {
        Some(placement) => placement.realized_output(&port).to_string(),
        None => port,
    };
    let output = resolve_output(machine, slot, realized_entity, &slot_port)?;
    Ok(ResolvedReference {
        slot: slot.to_string(),
        slot_port,
        output,
    })
}

/// Expands allocated program parts into primitives
pub struct Expander<'a> {
    machine: &'a Machine,
    program: &'a Program,
}

impl<'a> Expander<'a> {
    pub fn new(machine: &'a Machine, program: &'a Program) -> Self {
        Self { machine, program }
    }

    pub fn expand(&self, allocation: &Allocation, trace: &mut CompileTrace) -> CompileResult<ExpandedCircuit> {
        let mut circuit = ExpandedCircuit::default();
        let mut queue = VecDeque::new();

        for placement in &allocation.placements {
            queue.push_back(Pending {
                path: placement.slot.clone(),
                entity: placement.slot_entity.clone(),
                part: placement.part.clone(),
                bindings: self.bind_part(allocation, placement)?,
            });
        }

        while let Some(pending) = queue.pop_front() {
            let entity = self
                .machine
                .require_entity(&pending.entity, format!("instance {}", pending.path))?;
            if entity.is_macro() {
                for sub in self.unfold(entity, &pending)? {
                    queue.push_back(sub);
                }
            } else {
                self.instantiate(entity, &pending, &mut circuit)?;
            }
        }

        for placement in &allocation.placements {
            let mine = |path: &str| path == placement.slot || path.starts_with(&format!("{}/", placement.slot));
            trace.record(TraceEvent::Expanded {
                part: placement.part.clone(),
                primitives: circuit.instances.iter().filter(|i| mine(i.path.as_str())).count(),
                nets: circuit.nets.iter().filter(|n| mine(n.destination.part.as_str())).count(),
                settings: circuit.settings.iter().filter(|s| mine(s.destination.part.as_str())).count(),
            });
        }
        Ok(circuit)
    }

    /// Bindings of a program part, in terms of its slot's ports
    fn bind_part(&self, allocation: &Allocation, placement: &Placement) -> CompileResult<BTreeMap<String, Bound>> {
        let part = self
            .program
            .find_part(&placement.part)
            .ok_or_else(|| CompileError::unknown_part(&placement.part, "allocation"))?;
        let requested = self
            .machine
            .require_entity(&placement.entity, format!("program part {}", part.name))?;
        let realized = self
            .machine
            .require_entity(&placement.slot_entity, format!("configurable part {}", placement.slot))?;

        let mut bound: BTreeMap<String, Bound> = BTreeMap::new();
        for (port, binding) in part.named_inputs(requested)? {
            let slot_port = placement.realized_input(&port);
            // inputs dropped by a reduction are pinned by its requirements
            if realized.input_port(slot_port).is_none() {
                continue;
            }
            let signal = self.resolve_binding(allocation, &part.name, binding)?;
            let current = Bound {
                signal,
                provenance: Provenance::Program,
                label: port.clone(),
            };
            if let Some(previous) = bound.get(slot_port) {
                return Err(CompileError::ConflictingInputs {
                    destination: format!("{}:{} (part {})", placement.slot, slot_port, part.name),
                    sources: vec![previous.source_label(), current.source_label()],
                });
            }
            bound.insert(slot_port.to_string(), current);
        }

        for (port, value) in placement.injected() {
            if !bound.contains_key(port) {
                let context = format!("is-a relation of {}", realized.name);
                bound.insert(
                    port.to_string(),
                    Bound {
                        signal: Signal::literal(value, &context)?,
                        provenance: Provenance::Machine,
                        label: port.to_string(),
                    },
                );
            }
        }

        for input in &realized.inputs {
            if bound.contains_key(&input.name) {
                continue;
            }
            match realized.default_inputs.get(&input.name) {
                Some(default) => {
                    let context = format!("defaults of {}", realized.name);
                    bound.insert(
                        input.name.clone(),
                        Bound {
                            signal: Signal::literal(default, &context)?,
                            provenance: Provenance::Machine,
                            label: input.name.clone(),
                        },
                    );
                }
                None => {
                    return Err(CompileError::MissingInput {
                        part: part.name.clone(),
                        slot: placement.slot.clone(),
                        port: input.name.clone(),
                    })
                }
            }
        }
        Ok(bound)
    }

    fn resolve_binding(&self, allocation: &Allocation, part: &str, binding: InputBinding) -> CompileResult<Signal> {
        match binding {
            InputBinding::Number(value) => Ok(Signal::Number { value, coefficient: None }),
            InputBinding::Bool(b) => Ok(Signal::Bool(b)),
            InputBinding::Coefficient(name) => self.coefficient(name, part),
            InputBinding::Reference { part: target, port: None } if self.program.coefficients.contains_key(&target) => {
                self.coefficient(target, part)
            }
            InputBinding::Reference { part: target, port } => {
                let context = format!("referenced by part {}", part);
                let resolved = resolve_reference(self.machine, allocation, &target, port.as_deref(), &context)?;
                Ok(Signal::Source {
                    endpoint: Endpoint::Port(resolved.output.endpoint),
                    kind: resolved.output.kind,
                })
            }
            InputBinding::Pseudo(PseudoPart::Disconnected) => Ok(Signal::Disconnected),
            InputBinding::Pseudo(p) => Ok(Signal::Source {
                endpoint: Endpoint::Pseudo(p),
                kind: PortKind::Analog,
            }),
        }
    }

    fn coefficient(&self, name: String, part: &str) -> CompileResult<Signal> {
        match self.program.coefficients.get(&name) {
            Some(value) => Ok(Signal::Number {
                value: *value,
                coefficient: Some(name),
            }),
            None => Err(CompileError::UnknownCoefficient {
                name,
                part: part.to_string(),
            }),
        }
    }

    /// Sub-parts of a macro instance with their bindings
    fn unfold(&self, entity: &EntityType, pending: &Pending) -> CompileResult<Vec<Pending>> {
        let mut subs = Vec::with_capacity(entity.parts.len());
        for sub in &entity.parts {
            let mut bindings = BTreeMap::new();
            for (port, wire) in &sub.inputs {
                let bound = match wire {
                    MacroWire::Input(name) => pending
                        .bindings
                        .get(name)
                        .cloned()
                        .ok_or_else(|| CompileError::unresolved(&entity.name, format!("{}:{} <- {}", sub.name, port, name)))?,
                    MacroWire::Sibling(source) => {
                        let sibling = entity
                            .sub_part(&source.part)
                            .ok_or_else(|| CompileError::unresolved(&entity.name, source.to_string()))?;
                        let sibling_entity = self
                            .machine
                            .require_entity(&sibling.entity, format!("macro {}", entity.name))?;
                        let path = format!("{}/{}", pending.path, sibling.name);
                        let output = resolve_output(self.machine, &path, sibling_entity, &source.port)?;
                        Bound {
                            signal: Signal::Source {
                                endpoint: Endpoint::Port(output.endpoint),
                                kind: output.kind,
                            },
                            provenance: Provenance::Machine,
                            label: format!("{}:{}", sub.name, port),
                        }
                    }
                    MacroWire::Fixed(value) => Bound {
                        signal: Signal::literal(value, &format!("macro {}", entity.name))?,
                        provenance: Provenance::Machine,
                        label: format!("{}:{}", sub.name, port),
                    },
                };
                bindings.insert(port.clone(), bound);
            }
            subs.push(Pending {
                path: format!("{}/{}", pending.path, sub.name),
                entity: sub.entity.clone(),
                part: pending.part.clone(),
                bindings,
            });
        }
        Ok(subs)
    }

    fn instantiate(&self, entity: &EntityType, pending: &Pending, circuit: &mut ExpandedCircuit) -> CompileResult<()> {
        circuit.instances.push(PrimitiveInstance {
            path: pending.path.clone(),
            entity: entity.name.clone(),
            part: pending.part.clone(),
        });

        for input in &entity.inputs {
            let bound = match pending.bindings.get(&input.name) {
                Some(bound) => bound.clone(),
                None => {
                    let default = entity.default_inputs.get(&input.name).ok_or_else(|| CompileError::MissingInput {
                        part: pending.part.clone(),
                        slot: pending.path.clone(),
                        port: input.name.clone(),
                    })?;
                    Bound {
                        signal: Signal::literal(default, &format!("defaults of {}", entity.name))?,
                        provenance: Provenance::Machine,
                        label: input.name.clone(),
                    }
                }
            };

            let destination = PortRef::new(&pending.path, &input.name);
            match (input.kind, bound.signal) {
                (_, Signal::Disconnected) => {}
                (PortKind::Analog | PortKind::Digital, Signal::Source { endpoint, kind }) if kind == input.kind => {
                    circuit.nets.push(Net {
                        source: endpoint,
                        destination,
                        provenance: bound.provenance,
                        part: pending.part.clone(),
                        port: bound.label,
                    });
                }
                (PortKind::Numeric, Signal::Number { value, coefficient }) => {
                    circuit.settings.push(Setting {
                        destination,
                        value: SettingValue::Number(value),
                        coefficient,
                        provenance: bound.provenance,
                        part: pending.part.clone(),
                        port: bound.label,
                    });
                }
                (PortKind::Digital, Signal::Bool(b)) => {
                    circuit.settings.push(Setting {
                        destination,
                        value: SettingValue::Bool(b),
                        coefficient: None,
                        provenance: bound.provenance,
                        part: pending.part.clone(),
                        port: bound.label,
                    });
                }
                (expected, signal) => {
                    return Err(CompileError::PortKindMismatch {
                        part: pending.part.clone(),
                        port: bound.label,
                        expected: expected.to_string(),
                        found: signal.describe(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Weight and range of a primitive numeric input, for coefficient scaling
pub fn numeric_port(machine: &Machine, entity: &str, port: &str) -> Option<(f64, NumericRange)> {
    machine
        .entity(entity)
        .and_then(|e| e.input_port(port))
        .filter(|p| p.kind == PortKind::Numeric)
        .map(|p| (p.weight, p.range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::Allocator;
    use crate::architectures;
    use crate::coefficients::CoefficientResolver;
    use crate::layout::MachineLayout;
    use crate::machine::{InputPort, IsA, OutputPort, Requirement};
    use crate::program::ProgramPart;
    use pretty_assertions::assert_eq;

    fn expand(program: &Program) -> CompileResult<ExpandedCircuit> {
        let machine = architectures::mini();
        let mut trace = CompileTrace::new();
        let allocation = Allocator::new(&machine).allocate(program, &mut trace)?;
        Expander::new(&machine, program).expand(&allocation, &mut trace)
    }

    fn net_into<'c>(circuit: &'c ExpandedCircuit, part: &str, port: &str) -> Option<&'c Net> {
        circuit
            .nets
            .iter()
            .find(|n| n.destination == PortRef::new(part, port))
    }

    #[test]
    fn test_macro_unfolds_into_primitives() {
        let program = Program::new("t").part(
            ProgramPart::new("I", "INT2pm")
                .input("in", PseudoPart::MinusOne)
                .input("k", 0.5),
        );
        let circuit = expand(&program).unwrap();
        let paths: Vec<&str> = circuit.instances.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["IP0/int", "IP0/neg"]);

        let internal = net_into(&circuit, "IP0/neg", "in").unwrap();
        assert_eq!(internal.source, Endpoint::Port(PortRef::new("IP0/int", "o")));
        assert_eq!(internal.provenance, Provenance::Machine);

        let program_net = net_into(&circuit, "IP0/int", "in").unwrap();
        assert_eq!(program_net.source, Endpoint::Pseudo(PseudoPart::MinusOne));
        assert_eq!(program_net.provenance, Provenance::Program);
        assert_eq!(program_net.part, "I");
    }

    #[test]
    fn test_reference_to_macro_output() {
        let program = Program::new("t")
            .part(ProgramPart::new("I", "INT2pm").input("in", PseudoPart::PlusOne).input("k", 0.5))
            .part(ProgramPart::new("S", "SUM").input("a", InputBinding::reference("I", "inv")));
        let circuit = expand(&program).unwrap();
        let net = net_into(&circuit, "SUM0", "a").unwrap();
        assert_eq!(net.source, Endpoint::Port(PortRef::new("IP0/neg", "o")));
    }

    #[test]
    fn test_coefficient_by_bare_name() {
        let program = Program::new("t")
            .coefficient("k", 0.25)
            .part(ProgramPart::new("S", "SUM").input("alpha", InputBinding::part("k")));
        let circuit = expand(&program).unwrap();
        let setting = circuit
            .settings
            .iter()
            .find(|s| s.destination == PortRef::new("SUM0", "alpha"))
            .unwrap();
        assert_eq!(setting.value, SettingValue::Number(0.25));
        assert_eq!(setting.coefficient.as_deref(), Some("k"));
        assert_eq!(setting.provenance, Provenance::Program);
    }

    #[test]
    fn test_defaults_fill_unbound_inputs() {
        let program = Program::new("t").part(
            ProgramPart::new("I", "INT2m")
                .input("in", PseudoPart::PlusOne)
                .input("k", 1.0),
        );
        let circuit = expand(&program).unwrap();
        let ic_neg = circuit
            .settings
            .iter()
            .find(|s| s.destination == PortRef::new("INT0", "ic_neg"))
            .unwrap();
        assert_eq!(ic_neg.value, SettingValue::Bool(false));
        assert_eq!(ic_neg.provenance, Provenance::Machine);
        assert!(net_into(&circuit, "INT0", "in10").is_none());
    }

    #[test]
    fn test_missing_input() {
        let program = Program::new("t").part(ProgramPart::new("M", "MUL").input("x", PseudoPart::PlusOne));
        match expand(&program).unwrap_err() {
            CompileError::MissingInput { part, slot, port } => {
                assert_eq!((part.as_str(), slot.as_str(), port.as_str()), ("M", "MUL0", "y"));
            }
            other => panic!("expected missing input, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_part_reference() {
        let program = Program::new("t").part(ProgramPart::new("S", "SUM").input("a", InputBinding::part("ghost")));
        assert!(matches!(expand(&program).unwrap_err(), CompileError::UnknownPart { .. }));
    }

    #[test]
    fn test_allocatable_slot_is_not_a_program_name() {
        let program = Program::new("t").part(ProgramPart::new("S", "SUM").input("a", InputBinding::part("INT0")));
        assert!(matches!(expand(&program).unwrap_err(), CompileError::UnknownPart { .. }));
    }

    #[test]
    fn test_fixed_part_reference() {
        let program = Program::new("t").part(ProgramPart::new("S", "SUM").input("a", InputBinding::part("EXT0")));
        let circuit = expand(&program).unwrap();
        let net = net_into(&circuit, "SUM0", "a").unwrap();
        assert_eq!(net.source, Endpoint::Port(PortRef::new("EXT0", "o")));
    }

    #[test]
    fn test_unknown_coefficient() {
        let program = Program::new("t").part(ProgramPart::new("S", "SUM").input("alpha", InputBinding::coefficient("nope")));
        assert!(matches!(expand(&program).unwrap_err(), CompileError::UnknownCoefficient { .. }));
    }

    #[test]
    fn test_number_on_analog_input() {
        let program = Program::new("t").part(ProgramPart::new("S", "SUM").input("a", 0.5));
        assert!(matches!(expand(&program).unwrap_err(), CompileError::PortKindMismatch { .. }));
    }

    #[test]
    fn test_digital_output_on_analog_input() {
        let program = Program::new("t")
            .part(ProgramPart::new("C", "CMP").input("a", PseudoPart::PlusOne))
            .part(ProgramPart::new("S", "SUM").input("a", InputBinding::part("C")));
        match expand(&program).unwrap_err() {
            CompileError::PortKindMismatch { part, expected, .. } => {
                assert_eq!(part, "S");
                assert_eq!(expected, "analog");
            }
            other => panic!("expected kind mismatch, got {:?}", other),
        }
    }

    fn with_entity(entity: EntityType, declaring: &str, relation: IsA) -> Machine {
        let mut machine = architectures::mini();
        machine.entities.push(entity);
        if let Some(e) = machine.entities.iter_mut().find(|e| e.name == declaring) {
            e.is_a.push(relation);
        }
        machine
    }

    #[test]
    fn test_two_ports_onto_one_slot_input() {
        let duo = EntityType::primitive("DUO")
            .input(InputPort::analog("x"))
            .input(InputPort::analog("y"))
            .output(OutputPort::analog("o"));
        let mut relation = IsA::new("SUM");
        relation.ports.insert("x".to_string(), "a".to_string());
        relation.ports.insert("y".to_string(), "a".to_string());
        let machine = with_entity(duo, "DUO", relation);

        let program = Program::new("t").part(
            ProgramPart::new("D", "DUO")
                .input("x", PseudoPart::PlusOne)
                .input("y", PseudoPart::MinusOne),
        );
        let mut trace = CompileTrace::new();
        let allocation = Allocator::new(&machine).allocate(&program, &mut trace).unwrap();
        assert_eq!(allocation.placements[0].slot, "SUM0");

        match Expander::new(&machine, &program).expand(&allocation, &mut trace).unwrap_err() {
            CompileError::ConflictingInputs { destination, sources } => {
                assert!(destination.starts_with("SUM0:a"));
                assert_eq!(sources.len(), 2);
                assert!(sources[0].contains("+1"));
                assert!(sources[1].contains("-1"));
            }
            other => panic!("expected conflicting inputs, got {:?}", other),
        }
    }

    #[test]
    fn test_substitution_injects_potentiometer_value() {
        let inverter = EntityType::primitive("INV1")
            .input(InputPort::analog("in"))
            .output(OutputPort::analog("o"));
        let mut relation = IsA::new("INV1").requires(Requirement::InputEquals {
            port: "alpha".to_string(),
            value: InputBinding::Number(1.0),
        });
        relation.ports.insert("a".to_string(), "in".to_string());
        let machine = with_entity(inverter, "SUM", relation);

        let program = Program::new("t").part(ProgramPart::new("N", "INV1").input("in", PseudoPart::PlusOne));
        let mut trace = CompileTrace::new();
        let allocation = Allocator::new(&machine).allocate(&program, &mut trace).unwrap();
        let circuit = Expander::new(&machine, &program).expand(&allocation, &mut trace).unwrap();

        let alpha = circuit
            .settings
            .iter()
            .find(|s| s.destination == PortRef::new("SUM0", "alpha"))
            .unwrap();
        assert_eq!(alpha.value, SettingValue::Number(1.0));
        assert_eq!(alpha.provenance, Provenance::Machine);
        assert_eq!(net_into(&circuit, "SUM0", "a").unwrap().source, Endpoint::Pseudo(PseudoPart::PlusOne));

        let layout = MachineLayout::new(&machine).unwrap();
        let values = CoefficientResolver::new(&machine, &layout).resolve(&circuit, &mut trace).unwrap();
        assert_eq!(values.potentiometers[0].slots[0].value, 1023);
        assert!(values.potentiometers[0].slots[0].occupied);
    }

    #[test]
    fn test_reduced_macro_drops_internal_inverter() {
        let program = Program::new("t")
            .part(ProgramPart::new("X1", "INT2pm").input("in", PseudoPart::PlusOne).input("k", 0.2))
            .part(ProgramPart::new("X2", "INT2pm").input("in", InputBinding::part("X1")).input("k", 0.1));
        let circuit = expand(&program).unwrap();
        assert_eq!(circuit.instance("INT0").map(|i| i.part.as_str()), Some("X2"));
        let net = net_into(&circuit, "INT0", "in").unwrap();
        assert_eq!(net.source, Endpoint::Port(PortRef::new("IP0/int", "o")));
    }
}
