//! Configuration emitter
//!
//! Assembles the routed crossbars and resolved values into a
//! [`HardwareConfig`], and resolves every observable to the readout address
//! of the configurable part that realizes it.

use crate::allocator::Allocation;
use crate::coefficients::ResolvedValues;
use crate::error::{CompileError, CompileResult};
use crate::expander::resolve_reference;
use crate::hardware::{CrossbarConfig, HardwareConfig, ObservableAddress};
use crate::layout::MachineLayout;
use crate::machine::Machine;
use crate::program::{InputBinding, Program};
use crate::trace::{CompileTrace, TraceEvent};

/// Code generator for the hybrid controller
pub struct CodeGenerator<'a> {
    machine: &'a Machine,
    layout: &'a MachineLayout,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(machine: &'a Machine, layout: &'a MachineLayout) -> Self {
        Self { machine, layout }
    }

    /// Build the final configuration. Consumes the trace so that it ends up
    /// in the result.
    pub fn generate(
        &self,
        program: &Program,
        allocation: &Allocation,
        crossbars: Vec<CrossbarConfig>,
        values: ResolvedValues,
        mut trace: CompileTrace,
    ) -> CompileResult<HardwareConfig> {
        let mut observables = Vec::with_capacity(program.observables.len());
        for (name, target) in &program.observables {
            let observable = self.observable(allocation, name, target)?;
            trace.record(TraceEvent::Observable {
                name: observable.name.clone(),
                part: format!("{}:{}", observable.part, observable.port),
                slot: observable.slot.clone(),
                port: observable.slot_port.clone(),
                address: observable.address,
            });
            observables.push(observable);
        }

        Ok(HardwareConfig {
            machine: self.machine.title.clone(),
            program: program.title.clone(),
            allocation: allocation.placements.clone(),
            crossbars,
            potentiometers: values.potentiometers,
            digital_outputs: values.digital_outputs,
            observables,
            trace,
        })
    }

    fn observable(&self, allocation: &Allocation, name: &str, target: &InputBinding) -> CompileResult<ObservableAddress> {
        let (part, port) = match target {
            InputBinding::Reference { part, port } => (part, port),
            other => {
                return Err(CompileError::parse_error(format!(
                    "observable {} must name a part output, got {}",
                    name, other
                )))
            }
        };
        let context = format!("observable {}", name);
        let resolved = resolve_reference(self.machine, allocation, part, port.as_deref(), &context)?;

        let address = self
            .machine
            .configurable_part(&resolved.slot)
            .and_then(|slot| slot.address.get(&resolved.slot_port))
            .copied()
            .ok_or_else(|| CompileError::MissingAddress {
                observable: name.to_string(),
                slot: resolved.slot.clone(),
                port: resolved.slot_port.clone(),
            })?;
        let digital_input = self
            .layout
            .digital_input_for(&resolved.output.endpoint)
            .map(|d| (d.controller.clone(), d.index));

        let port = match port {
            Some(port) => port.clone(),
            None => allocation
                .placement(part)
                .and_then(|p| self.machine.entity(&p.entity))
                .or_else(|| {
                    self.machine
                        .configurable_part(part)
                        .and_then(|slot| self.machine.entity(&slot.entity))
                })
                .and_then(|e| e.default_output())
                .map(|o| o.name.clone())
                .unwrap_or_else(|| resolved.slot_port.clone()),
        };

        Ok(ObservableAddress {
            name: name.to_string(),
            part: part.clone(),
            port,
            slot: resolved.slot,
            slot_port: resolved.slot_port,
            address,
            digital_input,
        })
    }
}
