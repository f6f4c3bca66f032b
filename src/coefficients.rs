//! Coefficient and digital value resolution
//!
//! Numeric settings are divided by their port's fixed weight and quantized
//! onto the potentiometer wired to that port; booleans become digital output
//! bits. Values are never clamped: a value that does not fit is an error.

use std::collections::BTreeMap;

use crate::error::{CompileError, CompileResult};
use crate::expander::{numeric_port, ExpandedCircuit, Provenance, Setting, SettingValue};
use crate::hardware::{quantize, DigitalOutputTable, DigitalSlot, PotentiometerSlot, PotentiometerTable};
use crate::layout::MachineLayout;
use crate::machine::{Machine, NumericRange, PortKind};
use crate::trace::{CompileTrace, TraceEvent};

/// Normalized potentiometer fraction for `value` on a port of the given
/// weight and range, or `None` if it does not fit
pub fn fraction(value: f64, weight: f64, range: NumericRange) -> Option<f64> {
    let scaled = value / weight;
    if !range.contains(scaled) {
        return None;
    }
    Some((scaled - range.min) / (range.max - range.min))
}

/// Quantized values for every potentiometer and digital output
#[derive(Debug, Clone)]
pub struct ResolvedValues {
    pub potentiometers: Vec<PotentiometerTable>,
    pub digital_outputs: Vec<DigitalOutputTable>,
}

/// Resolves settings against the machine's potentiometers and digital outputs
pub struct CoefficientResolver<'a> {
    machine: &'a Machine,
    layout: &'a MachineLayout,
}

impl<'a> CoefficientResolver<'a> {
    pub fn new(machine: &'a Machine, layout: &'a MachineLayout) -> Self {
        Self { machine, layout }
    }

    pub fn resolve(&self, circuit: &ExpandedCircuit, trace: &mut CompileTrace) -> CompileResult<ResolvedValues> {
        let mut potentiometers: Vec<PotentiometerTable> = self
            .layout
            .potentiometers
            .iter()
            .map(|p| PotentiometerTable {
                name: p.name.clone(),
                address: p.address,
                resolution_bits: p.resolution_bits,
                slots: p
                    .labels
                    .iter()
                    .map(|label| PotentiometerSlot {
                        label: label.clone(),
                        occupied: false,
                        value: 0,
                        source: None,
                    })
                    .collect(),
            })
            .collect();
        let mut digital_outputs: Vec<DigitalOutputTable> = self
            .layout
            .digital_outputs
            .iter()
            .map(|d| DigitalOutputTable {
                name: d.name.clone(),
                address: d.address,
                slots: d
                    .labels
                    .iter()
                    .map(|label| DigitalSlot {
                        label: label.clone(),
                        occupied: false,
                        value: false,
                        source: None,
                    })
                    .collect(),
            })
            .collect();

        let entities: BTreeMap<&str, &str> = circuit
            .instances
            .iter()
            .map(|i| (i.path.as_str(), i.entity.as_str()))
            .collect();

        for setting in &circuit.settings {
            match setting.value {
                SettingValue::Number(value) => {
                    let Some((table, slot)) = self.layout.potentiometer_for(&setting.destination) else {
                        self.unbacked(setting)?;
                        continue;
                    };
                    let entity = entities
                        .get(setting.destination.part.as_str())
                        .copied()
                        .ok_or_else(|| CompileError::unknown_entity(&setting.destination.part, "no instance at this path"))?;
                    let (weight, range) = numeric_port(self.machine, entity, &setting.destination.port)
                        .ok_or_else(|| CompileError::unknown_port(&setting.part, entity, &setting.destination.port))?;
                    let normalized = fraction(value, weight, range)
                        .ok_or_else(|| self.out_of_range(setting, entity, value, weight, range))?;

                    let pot = &mut potentiometers[table];
                    let quantized = quantize(normalized, pot.resolution_bits);
                    let entry = &mut pot.slots[slot];
                    entry.occupied = true;
                    entry.value = quantized;
                    entry.source = Some(format!("{}:{}", setting.part, setting.port));
                    trace.record(TraceEvent::CoefficientResolved {
                        part: setting.part.clone(),
                        port: setting.port.clone(),
                        coefficient: setting.coefficient.clone(),
                        value,
                        target: pot.name.clone(),
                        slot,
                        destination: setting.destination.to_string(),
                        setting: quantized,
                    });
                }
                SettingValue::Bool(value) => {
                    let Some((table, slot)) = self.layout.digital_output_for(&setting.destination) else {
                        self.unbacked(setting)?;
                        continue;
                    };
                    let digital = &mut digital_outputs[table];
                    let entry = &mut digital.slots[slot];
                    entry.occupied = true;
                    entry.value = value;
                    entry.source = Some(format!("{}:{}", setting.part, setting.port));
                    trace.record(TraceEvent::DigitalResolved {
                        part: setting.part.clone(),
                        port: setting.port.clone(),
                        value,
                        target: digital.name.clone(),
                        slot,
                        destination: setting.destination.to_string(),
                    });
                }
            }
        }

        Ok(ResolvedValues {
            potentiometers,
            digital_outputs,
        })
    }

    /// A value with nowhere to go is fine for machine defaults only
    fn unbacked(&self, setting: &Setting) -> CompileResult<()> {
        match setting.provenance {
            Provenance::Machine => {
                tracing::debug!("no hardware behind {}, keeping its default", setting.destination);
                Ok(())
            }
            Provenance::Program => Err(CompileError::CoefficientNotConfigurable {
                part: setting.part.clone(),
                port: setting.port.clone(),
                destination: setting.destination.to_string(),
            }),
        }
    }

    fn out_of_range(&self, setting: &Setting, entity: &str, value: f64, weight: f64, range: NumericRange) -> CompileError {
        let hint = self
            .machine
            .entity(entity)
            .and_then(|e| {
                e.inputs.iter().find(|p| {
                    p.kind == PortKind::Numeric
                        && p.name != setting.destination.port
                        && p.weight != weight
                        && fraction(value, p.weight, p.range).is_some()
                })
            })
            .map(|p| format!(" (input {} with weight {} would fit)", p.name, p.weight))
            .unwrap_or_default();

        CompileError::CoefficientOutOfRange {
            part: setting.part.clone(),
            port: setting.port.clone(),
            value,
            weight,
            min: range.min,
            max: range.max,
            hint,
        }
    }
}
