//! Physical layout of a machine
//!
//! Enumerations in a machine description name ports at the level of
//! configurable parts (`IP0:in`, `IP0:k`). The compiler reasons about
//! primitive instances, so this module rewrites every enumeration entry into
//! primitive-level endpoints once, when the compiler is created:
//!
//! - crossbar columns become the primitive output (or pseudo part) they carry
//! - crossbar rows become the set of primitive inputs they drive; a macro
//!   input fans out through the macro's internal wiring
//! - potentiometer and digital output slots become exactly one primitive input

use std::collections::BTreeMap;

use crate::error::{CompileError, CompileResult};
use crate::machine::{
    CrossbarEncoding, EntityType, Endpoint, Machine, MacroWire, Pin, PortKind, PortRef, PseudoPart,
    WiredPart,
};

/// A primitive output reached from a (possibly macro) output port
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOutput {
    pub endpoint: PortRef,
    pub kind: PortKind,
}

/// Entity type of an instance path (`SLOT` or `SLOT/sub/...`)
pub fn resolve_path<'m>(machine: &'m Machine, path: &str) -> CompileResult<&'m EntityType> {
    let mut segments = path.split('/');
    let slot_name = segments.next().unwrap_or_default();
    let slot = machine
        .configurable_part(slot_name)
        .ok_or_else(|| CompileError::unknown_part(slot_name, format!("instance path {}", path)))?;
    let mut entity = machine.require_entity(&slot.entity, format!("configurable part {}", slot.name))?;

    for segment in segments {
        let sub = entity
            .sub_part(segment)
            .ok_or_else(|| CompileError::unknown_part(segment, format!("instance path {}", path)))?;
        entity = machine.require_entity(&sub.entity, format!("instance path {}", path))?;
    }
    Ok(entity)
}

/// Follow macro exports down to the primitive that drives `path:port`
pub fn resolve_output(
    machine: &Machine,
    path: &str,
    entity: &EntityType,
    port: &str,
) -> CompileResult<ResolvedOutput> {
    let mut path = path.to_string();
    let mut entity = entity;
    let mut port = port.to_string();

    loop {
        let output = entity
            .output_port(&port)
            .ok_or_else(|| CompileError::unknown_port(&path, &entity.name, &port))?;
        if !entity.is_macro() {
            return Ok(ResolvedOutput {
                endpoint: PortRef::new(path, port),
                kind: output.kind,
            });
        }

        let export = entity
            .exports
            .get(&port)
            .ok_or_else(|| CompileError::unresolved(&entity.name, format!("output {}", port)))?;
        let sub = entity
            .sub_part(&export.part)
            .ok_or_else(|| CompileError::unresolved(&entity.name, export.to_string()))?;
        entity = machine.require_entity(&sub.entity, format!("macro {}", entity.name))?;
        path = format!("{}/{}", path, sub.name);
        port = export.port.clone();
    }
}

/// All primitive inputs that `path:port` feeds, in sorted order
pub fn resolve_input(
    machine: &Machine,
    path: &str,
    entity: &EntityType,
    port: &str,
) -> CompileResult<(PortKind, Vec<PortRef>)> {
    let kind = entity
        .input_port(port)
        .ok_or_else(|| CompileError::unknown_port(path, &entity.name, port))?
        .kind;

    let mut found = Vec::new();
    let mut work = vec![(path.to_string(), entity, port.to_string())];
    while let Some((path, entity, port)) = work.pop() {
        if !entity.is_macro() {
            found.push(PortRef::new(path, port));
            continue;
        }
        for sub in &entity.parts {
            for (sub_port, wire) in &sub.inputs {
                if matches!(wire, MacroWire::Input(name) if *name == port) {
                    let sub_entity = machine.require_entity(&sub.entity, format!("macro {}", entity.name))?;
                    work.push((format!("{}/{}", path, sub.name), sub_entity, sub_port.clone()));
                }
            }
        }
    }
    found.sort();
    Ok((kind, found))
}

/// One crossbar in primitive terms
#[derive(Debug, Clone)]
pub struct CrossbarLayout {
    pub name: String,
    pub address: u16,
    pub encoding: CrossbarEncoding,
    /// Source carried by each input column; `None` for unused columns
    pub columns: Vec<Option<Endpoint>>,
    /// Primitive inputs driven by each output row
    pub rows: Vec<Vec<PortRef>>,
    pub column_labels: Vec<String>,
    pub row_labels: Vec<String>,
}

impl CrossbarLayout {
    /// Index of the first column carrying `source`
    pub fn column_of(&self, source: &Endpoint) -> Option<usize> {
        self.columns.iter().position(|c| c.as_ref() == Some(source))
    }
}

/// A potentiometer channel list (bank or controller)
#[derive(Debug, Clone)]
pub struct PotentiometerLayout {
    pub name: String,
    pub address: u16,
    pub resolution_bits: u32,
    pub slots: Vec<Option<PortRef>>,
    pub labels: Vec<String>,
}

/// A controller's digital output list
#[derive(Debug, Clone)]
pub struct DigitalOutputLayout {
    pub name: String,
    pub address: u16,
    pub slots: Vec<Option<PortRef>>,
    pub labels: Vec<String>,
}

/// A controller's digital input (readout) slot
#[derive(Debug, Clone)]
pub struct DigitalInputSlot {
    pub controller: String,
    pub index: usize,
    pub source: PortRef,
}

/// Every wired part of a machine, canonicalized
#[derive(Debug, Clone, Default)]
pub struct MachineLayout {
    pub crossbars: Vec<CrossbarLayout>,
    pub potentiometers: Vec<PotentiometerLayout>,
    pub digital_outputs: Vec<DigitalOutputLayout>,
    pub digital_inputs: Vec<DigitalInputSlot>,
    /// Primitive input -> (potentiometer list, slot)
    pot_index: BTreeMap<PortRef, (usize, usize)>,
    /// Primitive input -> (digital output list, slot)
    digital_index: BTreeMap<PortRef, (usize, usize)>,
}

impl MachineLayout {
    /// Canonicalize the wired parts of a validated machine
    pub fn new(machine: &Machine) -> CompileResult<Self> {
        let mut builder = LayoutBuilder {
            machine,
            layout: MachineLayout::default(),
            row_owner: BTreeMap::new(),
        };
        for wired in &machine.wired_parts {
            match wired {
                WiredPart::Crossbar(xbar) => {
                    let mut columns = Vec::with_capacity(xbar.input_columns.len());
                    for pin in &xbar.input_columns {
                        columns.push(builder.source(pin, &xbar.name)?);
                    }
                    let mut rows = Vec::with_capacity(xbar.output_rows.len());
                    for (index, pin) in xbar.output_rows.iter().enumerate() {
                        let row = builder.row(pin, &xbar.name)?;
                        builder.claim_row(&row, &xbar.name, index)?;
                        rows.push(row);
                    }
                    builder.layout.crossbars.push(CrossbarLayout {
                        name: xbar.name.clone(),
                        address: xbar.address,
                        encoding: xbar.encoding,
                        columns,
                        rows,
                        column_labels: xbar.input_columns.iter().map(Pin::to_string).collect(),
                        row_labels: xbar.output_rows.iter().map(Pin::to_string).collect(),
                    });
                }
                WiredPart::PotentiometerBank(bank) => {
                    builder.potentiometers(&bank.name, bank.address, bank.resolution_bits, &bank.enumeration)?;
                }
                WiredPart::Controller(hc) => {
                    builder.potentiometers(&hc.name, hc.address, hc.resolution_bits, &hc.potentiometers)?;
                    builder.digital_outputs(&hc.name, hc.address, &hc.digital_outputs)?;
                    for (index, pin) in hc.digital_inputs.iter().enumerate() {
                        if let Some(Endpoint::Port(source)) = builder.source(pin, &hc.name)? {
                            builder.layout.digital_inputs.push(DigitalInputSlot {
                                controller: hc.name.clone(),
                                index,
                                source,
                            });
                        }
                    }
                }
            }
        }
        Ok(builder.layout)
    }

    /// Potentiometer list and slot wired to a primitive input
    pub fn potentiometer_for(&self, destination: &PortRef) -> Option<(usize, usize)> {
        self.pot_index.get(destination).copied()
    }

    /// Digital output list and slot wired to a primitive input
    pub fn digital_output_for(&self, destination: &PortRef) -> Option<(usize, usize)> {
        self.digital_index.get(destination).copied()
    }

    /// Controller digital input reading a primitive output
    pub fn digital_input_for(&self, source: &PortRef) -> Option<&DigitalInputSlot> {
        self.digital_inputs.iter().find(|d| d.source == *source)
    }
}

struct LayoutBuilder<'m> {
    machine: &'m Machine,
    layout: MachineLayout,
    /// Primitive input -> crossbar row already driving it
    row_owner: BTreeMap<PortRef, String>,
}

impl<'m> LayoutBuilder<'m> {
    fn source(&self, pin: &Pin, owner: &str) -> CompileResult<Option<Endpoint>> {
        match pin {
            Pin::Pseudo(PseudoPart::Disconnected) => Ok(None),
            Pin::Pseudo(p) => Ok(Some(Endpoint::Pseudo(*p))),
            Pin::Port { part, port } => {
                let entity = resolve_path(self.machine, part)?;
                let port = match port {
                    Some(port) => port.clone(),
                    None => entity
                        .default_output()
                        .map(|o| o.name.clone())
                        .ok_or_else(|| CompileError::malformed(format!("{}: {} has no outputs", owner, part)))?,
                };
                let resolved = resolve_output(self.machine, part, entity, &port)?;
                Ok(Some(Endpoint::Port(resolved.endpoint)))
            }
        }
    }

    /// Primitive inputs behind an enumerated input pin
    fn destinations(&self, pin: &Pin, owner: &str) -> CompileResult<Option<(PortKind, Vec<PortRef>)>> {
        match pin {
            Pin::Pseudo(PseudoPart::Disconnected) => Ok(None),
            Pin::Pseudo(p) => Err(CompileError::malformed(format!(
                "{}: pseudo part {} cannot be an input",
                owner, p
            ))),
            Pin::Port { part, port: None } => Err(CompileError::malformed(format!(
                "{}: input enumeration entry {} names no port",
                owner, part
            ))),
            Pin::Port { part, port: Some(port) } => {
                let entity = resolve_path(self.machine, part)?;
                Ok(Some(resolve_input(self.machine, part, entity, port)?))
            }
        }
    }

    fn row(&self, pin: &Pin, owner: &str) -> CompileResult<Vec<PortRef>> {
        match self.destinations(pin, owner)? {
            None => Ok(Vec::new()),
            Some((PortKind::Numeric, _)) => Err(CompileError::malformed(format!(
                "{}: crossbar row {} is a numeric input",
                owner, pin
            ))),
            Some((_, destinations)) => Ok(destinations),
        }
    }

    fn claim_row(&mut self, row: &[PortRef], owner: &str, index: usize) -> CompileResult<()> {
        let label = format!("{} row {}", owner, index);
        for destination in row {
            if let Some(previous) = self.row_owner.insert(destination.clone(), label.clone()) {
                return Err(CompileError::malformed(format!(
                    "{} is driven by both {} and {}",
                    destination, previous, label
                )));
            }
        }
        Ok(())
    }

    /// The single primitive input behind a potentiometer or digital slot
    fn single(&self, pin: &Pin, owner: &str, expected: PortKind) -> CompileResult<Option<PortRef>> {
        match self.destinations(pin, owner)? {
            None => Ok(None),
            Some((kind, _)) if kind != expected => Err(CompileError::malformed(format!(
                "{}: {} is a {} input, expected {}",
                owner, pin, kind, expected
            ))),
            Some((_, mut destinations)) if destinations.len() == 1 => Ok(destinations.pop()),
            Some((_, destinations)) => Err(CompileError::malformed(format!(
                "{}: {} reaches {} primitive inputs, expected exactly one",
                owner,
                pin,
                destinations.len()
            ))),
        }
    }

    fn potentiometers(&mut self, name: &str, address: u16, resolution_bits: u32, pins: &[Pin]) -> CompileResult<()> {
        if pins.is_empty() {
            return Ok(());
        }
        let table = self.layout.potentiometers.len();
        let mut slots = Vec::with_capacity(pins.len());
        for (index, pin) in pins.iter().enumerate() {
            let slot = self.single(pin, name, PortKind::Numeric)?;
            if let Some(destination) = &slot {
                if self.layout.pot_index.insert(destination.clone(), (table, index)).is_some() {
                    return Err(CompileError::malformed(format!(
                        "{} is enumerated by more than one potentiometer",
                        destination
                    )));
                }
            }
            slots.push(slot);
        }
        self.layout.potentiometers.push(PotentiometerLayout {
            name: name.to_string(),
            address,
            resolution_bits,
            slots,
            labels: pins.iter().map(Pin::to_string).collect(),
        });
        Ok(())
    }

    fn digital_outputs(&mut self, name: &str, address: u16, pins: &[Pin]) -> CompileResult<()> {
        if pins.is_empty() {
            return Ok(());
        }
        let table = self.layout.digital_outputs.len();
        let mut slots = Vec::with_capacity(pins.len());
        for (index, pin) in pins.iter().enumerate() {
            let slot = self.single(pin, name, PortKind::Digital)?;
            if let Some(destination) = &slot {
                if self.layout.digital_index.insert(destination.clone(), (table, index)).is_some() {
                    return Err(CompileError::malformed(format!(
                        "{} is enumerated by more than one digital output",
                        destination
                    )));
                }
            }
            slots.push(slot);
        }
        self.layout.digital_outputs.push(DigitalOutputLayout {
            name: name.to_string(),
            address,
            slots,
            labels: pins.iter().map(Pin::to_string).collect(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::architectures;
    use crate::machine::Crossbar;

    #[test]
    fn test_macro_output_resolves_to_primitive() {
        let machine = architectures::mini();
        let entity = resolve_path(&machine, "IP0").unwrap();
        let out = resolve_output(&machine, "IP0", entity, "inv").unwrap();
        assert_eq!(out.endpoint, PortRef::new("IP0/neg", "o"));
        assert_eq!(out.kind, PortKind::Analog);
    }

    #[test]
    fn test_macro_input_fans_out() {
        let machine = architectures::mini();
        let entity = resolve_path(&machine, "IP0").unwrap();
        let (kind, destinations) = resolve_input(&machine, "IP0", entity, "in").unwrap();
        assert_eq!(kind, PortKind::Analog);
        assert_eq!(destinations, vec![PortRef::new("IP0/int", "in")]);
    }

    #[test]
    fn test_mini_layout() {
        let layout = MachineLayout::new(&architectures::mini()).unwrap();
        let xbar = &layout.crossbars[0];
        assert_eq!(xbar.columns.len(), 16);
        assert_eq!(xbar.columns[7], Some(Endpoint::Port(PortRef::new("IP0/neg", "o"))));
        assert_eq!(xbar.columns[9], Some(Endpoint::Pseudo(PseudoPart::PlusOne)));
        assert_eq!(xbar.columns[15], None);
        assert_eq!(xbar.rows[11], vec![PortRef::new("IP0/int", "in")]);

        assert_eq!(layout.potentiometer_for(&PortRef::new("SUM0", "alpha")), Some((0, 0)));
        assert_eq!(layout.potentiometer_for(&PortRef::new("IP0/int", "k")), Some((0, 12)));
        assert_eq!(layout.potentiometer_for(&PortRef::new("IP0/int", "ic")), Some((1, 2)));
        assert_eq!(layout.digital_output_for(&PortRef::new("INT1", "ic_neg")), Some((0, 1)));
        assert!(layout.digital_input_for(&PortRef::new("CMP0", "d")).is_some());
    }

    #[test]
    fn test_input_in_two_rows_is_rejected() {
        let mut machine = architectures::mini();
        machine.wired_parts.push(WiredPart::Crossbar(Crossbar::new(
            "XBAR1",
            0x0050,
            vec![Pin::output("SUM0")],
            vec![Pin::port("SUM0", "a")],
        )));
        let err = MachineLayout::new(&machine).unwrap_err();
        assert!(matches!(err, CompileError::MalformedMachine { .. }));
    }

    #[test]
    fn test_numeric_row_is_rejected() {
        let mut machine = architectures::mini();
        machine.wired_parts.push(WiredPart::Crossbar(Crossbar::new(
            "XBAR1",
            0x0050,
            vec![Pin::output("SUM0")],
            vec![Pin::port("SUM1", "alpha")],
        )));
        assert!(MachineLayout::new(&machine).is_err());
    }
}
