//! Part allocation
//!
//! Assigns every program part to one free allocatable slot of the machine,
//! in program declaration order, taking the first slot that fits:
//!
//! 1. a free slot of exactly the requested type
//! 2. otherwise the first free slot related by an is-a declaration whose
//!    side conditions the part satisfies
//!
//! There is no backtracking. A part that finds no slot fails the compile.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::machine::{ConfigurablePart, EntityType, IsA, Machine, Requirement};
use crate::program::{InputBinding, Program, ProgramPart};
use crate::trace::{CompileTrace, MatchRule, TraceEvent};

/// One program part placed on a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Program part name
    pub part: String,
    /// Requested entity type
    pub entity: String,
    /// Chosen configurable part
    pub slot: String,
    /// Realized entity type (always the slot's type)
    pub slot_entity: String,
    pub rule: MatchRule,
    /// The is-a declaration used, for substitute and reduce matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<IsA>,
}

impl Placement {
    /// Slot port realizing one of the requested type's inputs
    pub fn realized_input<'a>(&'a self, port: &'a str) -> &'a str {
        self.realize(port)
    }

    /// Slot port realizing one of the requested type's outputs
    pub fn realized_output<'a>(&'a self, port: &'a str) -> &'a str {
        self.realize(port)
    }

    fn realize<'a>(&'a self, port: &'a str) -> &'a str {
        match (&self.rule, &self.relation) {
            (MatchRule::Reduce, Some(relation)) => relation.to_target(port),
            (MatchRule::Substitute, Some(relation)) => relation.to_declaring(port),
            _ => port,
        }
    }

    /// Values a substituting slot needs on its own inputs to behave like the
    /// requested type
    pub fn injected(&self) -> Vec<(&str, &InputBinding)> {
        match (&self.rule, &self.relation) {
            (MatchRule::Substitute, Some(relation)) => relation
                .requires
                .iter()
                .filter_map(|r| match r {
                    Requirement::InputEquals { port, value } => Some((port.as_str(), value)),
                    Requirement::OutputUnused(_) => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The result of allocation, in program declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub placements: Vec<Placement>,
}

impl Allocation {
    pub fn placement(&self, part: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.part == part)
    }

    pub fn slot_of(&self, part: &str) -> Option<&str> {
        self.placement(part).map(|p| p.slot.as_str())
    }
}

/// Ports of a program part that constrain where it can go
struct Usage {
    inputs: BTreeMap<String, InputBinding>,
    outputs: BTreeSet<String>,
}

/// First-fit allocator
pub struct Allocator<'m> {
    machine: &'m Machine,
}

impl<'m> Allocator<'m> {
    pub fn new(machine: &'m Machine) -> Self {
        Self { machine }
    }

    /// Place every part of `program`
    pub fn allocate(&self, program: &Program, trace: &mut CompileTrace) -> CompileResult<Allocation> {
        program.check_names()?;

        let slots: Vec<&ConfigurablePart> = self.machine.allocatable_parts().collect();
        let mut used = vec![false; slots.len()];
        let mut allocation = Allocation::default();

        for part in &program.parts {
            let entity = self
                .machine
                .require_entity(&part.entity, format!("program part {}", part.name))?;
            let usage = Usage {
                inputs: part.named_inputs(entity)?,
                outputs: program.referenced_outputs(&part.name, entity.default_output().map(|o| o.name.as_str())),
            };
            for port in &usage.outputs {
                if entity.output_port(port).is_none() {
                    return Err(CompileError::unknown_port(&part.name, &entity.name, port));
                }
            }

            let (index, rule, relation) = self
                .choose(entity, &slots, &used, &usage)?
                .ok_or_else(|| self.exhausted(part, &slots))?;
            used[index] = true;

            let slot = slots[index];
            trace.record(TraceEvent::Allocated {
                part: part.name.clone(),
                entity: part.entity.clone(),
                slot: slot.name.clone(),
                slot_entity: slot.entity.clone(),
                rule,
            });
            allocation.placements.push(Placement {
                part: part.name.clone(),
                entity: part.entity.clone(),
                slot: slot.name.clone(),
                slot_entity: slot.entity.clone(),
                rule,
                relation,
            });
        }

        Ok(allocation)
    }

    fn choose(
        &self,
        entity: &EntityType,
        slots: &[&ConfigurablePart],
        used: &[bool],
        usage: &Usage,
    ) -> CompileResult<Option<(usize, MatchRule, Option<IsA>)>> {
        let free = || slots.iter().enumerate().filter(|(i, _)| !used[*i]);

        if let Some((index, _)) = free().find(|(_, slot)| slot.entity == entity.name) {
            return Ok(Some((index, MatchRule::Exact, None)));
        }

        for (index, slot) in free() {
            let slot_entity = self
                .machine
                .require_entity(&slot.entity, format!("configurable part {}", slot.name))?;
            if let Some(relation) = slot_entity.relation_to(&entity.name) {
                if substitutable(relation, slot_entity, usage) {
                    return Ok(Some((index, MatchRule::Substitute, Some(relation.clone()))));
                }
            }
            if let Some(relation) = entity.relation_to(&slot_entity.name) {
                if reducible(relation, entity, slot_entity, usage) {
                    return Ok(Some((index, MatchRule::Reduce, Some(relation.clone()))));
                }
            }
        }
        Ok(None)
    }

    fn exhausted(&self, part: &ProgramPart, slots: &[&ConfigurablePart]) -> CompileError {
        CompileError::ResourceExhausted {
            part: part.name.clone(),
            entity: part.entity.clone(),
            capacity: slots.iter().filter(|s| s.entity == part.entity).count(),
        }
    }
}

/// A slot of type `slot` (which declares `slot is-a requested`) can stand in
/// for the requested part when every used port maps onto the slot and no
/// bound input contradicts a value the relation injects
fn substitutable(relation: &IsA, slot: &EntityType, usage: &Usage) -> bool {
    for (port, binding) in &usage.inputs {
        let own = relation.to_declaring(port);
        if slot.input_port(own).is_none() {
            return false;
        }
        let conflicting = relation.requires.iter().any(|r| {
            matches!(r, Requirement::InputEquals { port: fixed, value } if fixed == own && value != binding)
        });
        if conflicting {
            return false;
        }
    }

    for port in &usage.outputs {
        let own = relation.to_declaring(port);
        if slot.output_port(own).is_none() {
            return false;
        }
        if relation
            .requires
            .iter()
            .any(|r| matches!(r, Requirement::OutputUnused(unused) if unused == own))
        {
            return false;
        }
    }
    true
}

/// A requested part of type `requested` (which declares `requested is-a
/// slot`) can be realized on the simpler slot when the program meets every
/// requirement and every used port exists on the slot
fn reducible(relation: &IsA, requested: &EntityType, slot: &EntityType, usage: &Usage) -> bool {
    let disconnected = InputBinding::disconnected();
    for requirement in &relation.requires {
        let holds = match requirement {
            Requirement::OutputUnused(port) => !usage.outputs.contains(port),
            Requirement::InputEquals { port, value } => {
                let effective = usage
                    .inputs
                    .get(port)
                    .or_else(|| requested.default_inputs.get(port))
                    .unwrap_or(&disconnected);
                effective == value
            }
        };
        if !holds {
            return false;
        }
    }

    let pinned = |port: &str| {
        relation
            .requires
            .iter()
            .any(|r| matches!(r, Requirement::InputEquals { port: fixed, .. } if fixed == port))
    };
    let inputs_fit = usage
        .inputs
        .keys()
        .all(|port| slot.input_port(relation.to_target(port)).is_some() || pinned(port.as_str()));
    let outputs_fit = usage
        .outputs
        .iter()
        .all(|port| slot.output_port(relation.to_target(port)).is_some());
    inputs_fit && outputs_fit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architectures;
    use crate::machine::{InputPort, OutputPort};
    use pretty_assertions::assert_eq;

    fn allocate(machine: &Machine, program: &Program) -> CompileResult<Allocation> {
        Allocator::new(machine).allocate(program, &mut CompileTrace::new())
    }

    #[test]
    fn test_first_fit_in_declaration_order() {
        let machine = architectures::mini();
        let program = Program::new("t")
            .part(ProgramPart::new("A", "SUM"))
            .part(ProgramPart::new("B", "SUM"))
            .part(ProgramPart::new("I", "INT2m"));
        let allocation = allocate(&machine, &program).unwrap();
        assert_eq!(allocation.slot_of("A"), Some("SUM0"));
        assert_eq!(allocation.slot_of("B"), Some("SUM1"));
        assert_eq!(allocation.slot_of("I"), Some("INT0"));
        assert!(allocation.placements.iter().all(|p| p.rule == MatchRule::Exact));
    }

    #[test]
    fn test_exhaustion() {
        let machine = architectures::mini();
        let mut program = Program::new("t");
        for i in 0..5 {
            program = program.part(ProgramPart::new(format!("S{}", i), "SUM"));
        }
        match allocate(&machine, &program).unwrap_err() {
            CompileError::ResourceExhausted { part, capacity, .. } => {
                assert_eq!(part, "S4");
                assert_eq!(capacity, 4);
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_macro_reduces_when_inverse_unused() {
        let machine = architectures::mini();
        let program = Program::new("t")
            .part(ProgramPart::new("X1", "INT2pm"))
            .part(ProgramPart::new("X2", "INT2pm").input("k", 0.5))
            .part(ProgramPart::new("S", "SUM").input("a", InputBinding::part("X2")));
        let allocation = allocate(&machine, &program).unwrap();
        assert_eq!(allocation.slot_of("X1"), Some("IP0"));
        let x2 = allocation.placement("X2").unwrap();
        assert_eq!(x2.slot, "INT0");
        assert_eq!(x2.slot_entity, "INT2m");
        assert_eq!(x2.rule, MatchRule::Reduce);
    }

    #[test]
    fn test_macro_cannot_reduce_when_inverse_used() {
        let machine = architectures::mini();
        let program = Program::new("t")
            .part(ProgramPart::new("X1", "INT2pm"))
            .part(ProgramPart::new("X2", "INT2pm"))
            .part(ProgramPart::new("S", "SUM").input("a", InputBinding::reference("X2", "inv")));
        let err = allocate(&machine, &program).unwrap_err();
        assert!(matches!(err, CompileError::ResourceExhausted { ref part, .. } if part == "X2"));
    }

    #[test]
    fn test_substitution_injects_required_values() {
        let mut machine = architectures::mini();
        machine.entities.push(
            EntityType::primitive("INV1")
                .input(InputPort::analog("in"))
                .output(OutputPort::analog("o")),
        );
        let sum = machine.entities.iter_mut().find(|e| e.name == "SUM").unwrap();
        let mut relation = IsA::new("INV1").requires(Requirement::InputEquals {
            port: "alpha".to_string(),
            value: InputBinding::Number(1.0),
        });
        relation.ports.insert("a".to_string(), "in".to_string());
        sum.is_a.push(relation);

        let program = Program::new("t").part(ProgramPart::new("N", "INV1").input("in", InputBinding::part("X")));
        let allocation = allocate(&machine, &program).unwrap();
        let placement = allocation.placement("N").unwrap();
        assert_eq!(placement.slot, "SUM0");
        assert_eq!(placement.rule, MatchRule::Substitute);
        assert_eq!(placement.realized_input("in"), "a");
        assert_eq!(placement.injected(), vec![("alpha", &InputBinding::Number(1.0))]);
    }

    #[test]
    fn test_unknown_entity() {
        let machine = architectures::mini();
        let program = Program::new("t").part(ProgramPart::new("Q", "QUANTUM"));
        assert!(matches!(
            allocate(&machine, &program).unwrap_err(),
            CompileError::UnknownEntityType { .. }
        ));
    }

    #[test]
    fn test_fixed_parts_are_never_allocated() {
        let machine = architectures::mini();
        let program = Program::new("t").part(ProgramPart::new("E", "EXT"));
        assert!(matches!(
            allocate(&machine, &program).unwrap_err(),
            CompileError::ResourceExhausted { capacity: 0, .. }
        ));
    }

    #[test]
    fn test_trace_records_every_placement() {
        let machine = architectures::mini();
        let program = Program::new("t")
            .part(ProgramPart::new("A", "SUM"))
            .part(ProgramPart::new("M", "MUL"));
        let mut trace = CompileTrace::new();
        Allocator::new(&machine).allocate(&program, &mut trace).unwrap();
        assert_eq!(trace.len(), 2);
    }
}
