//! Hardware configuration artefacts
//!
//! These are the values the analog computer's hybrid controller needs to set
//! up a circuit: one switch matrix per crossbar, one setting per digital
//! potentiometer, one bit per digital output, plus the readout addresses of
//! the observables.

use serde::{Deserialize, Serialize};

use crate::allocator::Placement;
use crate::layout::CrossbarLayout;
use crate::machine::CrossbarEncoding;
use crate::trace::CompileTrace;

/// Largest setting of a `bits`-bit potentiometer
pub fn max_setting(bits: u32) -> u32 {
    (1u32 << bits) - 1
}

/// Map a fraction in [0, 1] to the nearest potentiometer step, rounding
/// halves away from zero
pub fn quantize(fraction: f64, bits: u32) -> u32 {
    let max = max_setting(bits);
    let scaled = (fraction * max as f64).round();
    scaled.clamp(0.0, max as f64) as u32
}

/// The fraction a potentiometer step represents
pub fn dequantize(setting: u32, bits: u32) -> f64 {
    setting as f64 / max_setting(bits) as f64
}

/// Selected column per crossbar row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowAssignment {
    pub columns: usize,
    /// One entry per row; `None` leaves the row disabled
    pub selected: Vec<Option<usize>>,
}

impl RowAssignment {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self {
            columns,
            selected: vec![None; rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.selected.len()
    }

    pub fn select(&mut self, row: usize, column: usize) {
        self.selected[row] = Some(column);
    }

    pub fn is_set(&self, row: usize, column: usize) -> bool {
        self.selected.get(row).copied().flatten() == Some(column)
    }

    /// Rows with a selected column
    pub fn active_rows(&self) -> usize {
        self.selected.iter().filter(|s| s.is_some()).count()
    }

    /// Row-major bit matrix, row 0 first, column 0 first within a row
    pub fn bitstream(&self) -> String {
        let mut bits = String::with_capacity(self.rows() * self.columns);
        for row in 0..self.rows() {
            for column in 0..self.columns {
                bits.push(if self.is_set(row, column) { '1' } else { '0' });
            }
        }
        bits
    }

    /// The bitstream as uppercase hex, 4 bits per digit
    pub fn hexstream(&self) -> String {
        pack_hex(&self.bitstream(), 4)
    }

    /// AD8113 word: per row an enable bit and the column index, last row
    /// first, as hex bytes
    pub fn ad8113(&self) -> String {
        let width = index_width(self.columns);
        let mut bits = String::with_capacity(self.rows() * (width + 1));
        for selected in self.selected.iter().rev() {
            let (enable, index) = match selected {
                Some(column) => ('1', *column),
                None => ('0', 0),
            };
            bits.push(enable);
            bits.push_str(&format!("{:0width$b}", index, width = width));
        }
        pack_hex(&bits, 8)
    }
}

/// Bits needed to address `columns` columns
fn index_width(columns: usize) -> usize {
    let mut width = 1;
    while (1usize << width) < columns {
        width += 1;
    }
    width
}

/// Pack a string of '0'/'1' into hex, `group` bits at a time, padding the
/// last group with zeros on the right
fn pack_hex(bits: &str, group: usize) -> String {
    let mut hex = String::with_capacity(bits.len() / 4 + 2);
    for chunk in bits.as_bytes().chunks(group) {
        let mut value: u32 = 0;
        for i in 0..group {
            value <<= 1;
            if chunk.get(i) == Some(&b'1') {
                value |= 1;
            }
        }
        hex.push_str(&format!("{:0width$X}", value, width = group / 4));
    }
    hex
}

/// Configuration of one crossbar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossbarConfig {
    pub name: String,
    pub address: u16,
    pub encoding: CrossbarEncoding,
    pub column_labels: Vec<String>,
    pub row_labels: Vec<String>,
    pub assignment: RowAssignment,
    pub bitstream: String,
    pub hexstream: String,
    /// The word actually sent to the device
    pub device_word: String,
}

impl CrossbarConfig {
    pub fn new(layout: &CrossbarLayout, assignment: RowAssignment) -> Self {
        let bitstream = assignment.bitstream();
        let hexstream = assignment.hexstream();
        let device_word = match layout.encoding {
            CrossbarEncoding::OneHot => hexstream.clone(),
            CrossbarEncoding::Ad8113 => assignment.ad8113(),
        };
        Self {
            name: layout.name.clone(),
            address: layout.address,
            encoding: layout.encoding,
            column_labels: layout.column_labels.clone(),
            row_labels: layout.row_labels.clone(),
            assignment,
            bitstream,
            hexstream,
            device_word,
        }
    }

    /// Text grid of the switch matrix, one line per row
    pub fn diagram(&self) -> String {
        let label_width = self.row_labels.iter().map(String::len).max().unwrap_or(0);
        let mut out = String::new();

        out.push_str(&format!("{} @ 0x{:04X}\n", self.name, self.address));
        for (column, label) in self.column_labels.iter().enumerate() {
            out.push_str(&format!("{:>width$}  {:>2} {}\n", "", column, label, width = label_width));
        }

        out.push_str(&format!("{:>width$} ", "", width = label_width));
        for column in 0..self.assignment.columns {
            out.push_str(&format!(" {:X}", column % 16));
        }
        out.push('\n');

        for (row, label) in self.row_labels.iter().enumerate() {
            out.push_str(&format!("{:>width$} ", label, width = label_width));
            for column in 0..self.assignment.columns {
                out.push_str(if self.assignment.is_set(row, column) { " X" } else { " ." });
            }
            out.push('\n');
        }
        out
    }
}

/// One potentiometer channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentiometerSlot {
    /// Enumeration entry as written in the machine description
    pub label: String,
    pub occupied: bool,
    pub value: u32,
    /// Program part and port that set this channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Settings of a potentiometer bank or of the controller's potentiometers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentiometerTable {
    pub name: String,
    pub address: u16,
    pub resolution_bits: u32,
    pub slots: Vec<PotentiometerSlot>,
}

impl PotentiometerTable {
    /// Occupied channels as (slot, value)
    pub fn occupied(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.occupied)
            .map(|(i, s)| (i, s.value))
    }
}

/// One digital output bit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalSlot {
    pub label: String,
    pub occupied: bool,
    pub value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Digital outputs of one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalOutputTable {
    pub name: String,
    pub address: u16,
    pub slots: Vec<DigitalSlot>,
}

impl DigitalOutputTable {
    pub fn values(&self) -> Vec<bool> {
        self.slots.iter().map(|s| s.value).collect()
    }
}

/// Where an observable can be read back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservableAddress {
    pub name: String,
    /// Program part and port as written in the program
    pub part: String,
    pub port: String,
    /// Configurable part and port realizing it
    pub slot: String,
    pub slot_port: String,
    pub address: u16,
    /// Controller digital input reading the same signal, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digital_input: Option<(String, usize)>,
}

/// One line of the hybrid controller's serial configuration protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceCommand {
    Potentiometer { address: u16, port: usize, value: u32 },
    Digital { address: u16, port: usize, value: bool },
    Crossbar { address: u16, word: String },
}

impl std::fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceCommand::Potentiometer { address, port, value } => {
                write!(f, "P{:04X}{:02X}{:04}", address, port, value)
            }
            DeviceCommand::Digital { address, port, value } => {
                write!(f, "{}{:04X}{}", if *value { 'D' } else { 'd' }, address, port)
            }
            DeviceCommand::Crossbar { address, word } => write!(f, "X{:04X}{}", address, word),
        }
    }
}

/// A complete compiled configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub machine: String,
    pub program: String,
    pub allocation: Vec<Placement>,
    pub crossbars: Vec<CrossbarConfig>,
    pub potentiometers: Vec<PotentiometerTable>,
    pub digital_outputs: Vec<DigitalOutputTable>,
    pub observables: Vec<ObservableAddress>,
    pub trace: CompileTrace,
}

impl HardwareConfig {
    /// Export to JSON format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn crossbar(&self, name: &str) -> Option<&CrossbarConfig> {
        self.crossbars.iter().find(|x| x.name == name)
    }

    pub fn potentiometer_table(&self, name: &str) -> Option<&PotentiometerTable> {
        self.potentiometers.iter().find(|p| p.name == name)
    }

    /// Device commands: potentiometers, then digital outputs, then crossbars
    pub fn commands(&self) -> Vec<DeviceCommand> {
        let mut commands = Vec::new();
        for table in &self.potentiometers {
            for (port, value) in table.occupied() {
                commands.push(DeviceCommand::Potentiometer {
                    address: table.address,
                    port,
                    value,
                });
            }
        }
        for table in &self.digital_outputs {
            for (port, slot) in table.slots.iter().enumerate().filter(|(_, s)| s.occupied) {
                commands.push(DeviceCommand::Digital {
                    address: table.address,
                    port,
                    value: slot.value,
                });
            }
        }
        for xbar in &self.crossbars {
            commands.push(DeviceCommand::Crossbar {
                address: xbar.address,
                word: xbar.device_word.clone(),
            });
        }
        commands
    }

    /// Commands one per line
    pub fn command_stream(&self) -> String {
        self.commands().iter().map(|c| format!("{}\n", c)).collect()
    }

    pub fn diagram(&self) -> String {
        self.crossbars.iter().map(CrossbarConfig::diagram).collect::<Vec<_>>().join("\n")
    }
}

impl std::fmt::Display for HardwareConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Hardware Configuration")?;
        writeln!(f, "======================")?;
        writeln!(f, "Machine: {}", self.machine)?;
        writeln!(f, "Program: {}", self.program)?;
        writeln!(f)?;

        writeln!(f, "Allocation:")?;
        for placement in &self.allocation {
            writeln!(
                f,
                "  {} ({}) -> {} ({}, {})",
                placement.part, placement.entity, placement.slot, placement.slot_entity, placement.rule
            )?;
        }
        writeln!(f)?;

        for xbar in &self.crossbars {
            writeln!(f, "Crossbar {} @ 0x{:04X}:", xbar.name, xbar.address)?;
            writeln!(f, "  Active rows: {}/{}", xbar.assignment.active_rows(), xbar.assignment.rows())?;
            for (row, selected) in xbar.assignment.selected.iter().enumerate() {
                if let Some(column) = selected {
                    writeln!(f, "  {} <- {}", xbar.row_labels[row], xbar.column_labels[*column])?;
                }
            }
            writeln!(f, "  Hexstream: {}", xbar.hexstream)?;
            if xbar.device_word != xbar.hexstream {
                writeln!(f, "  Device word: {}", xbar.device_word)?;
            }
            writeln!(f)?;
        }

        for table in &self.potentiometers {
            writeln!(f, "Potentiometers {} @ 0x{:04X} ({}-bit):", table.name, table.address, table.resolution_bits)?;
            for (slot, entry) in table.slots.iter().enumerate().filter(|(_, s)| s.occupied) {
                writeln!(
                    f,
                    "  [{:2}] {:4}  {} ({})",
                    slot,
                    entry.value,
                    entry.label,
                    entry.source.as_deref().unwrap_or("-")
                )?;
            }
            writeln!(f)?;
        }

        for table in &self.digital_outputs {
            writeln!(f, "Digital outputs {} @ 0x{:04X}:", table.name, table.address)?;
            for (slot, entry) in table.slots.iter().enumerate() {
                writeln!(f, "  [{}] {}  {}", slot, u8::from(entry.value), entry.label)?;
            }
            writeln!(f)?;
        }

        if !self.observables.is_empty() {
            writeln!(f, "Observables:")?;
            for obs in &self.observables {
                writeln!(
                    f,
                    "  {} = {}:{} -> {}:{} @ 0x{:04X}",
                    obs.name, obs.part, obs.port, obs.slot, obs.slot_port, obs.address
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MAX_RESOLUTION_BITS;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_quantize_ten_bits() {
        assert_eq!(max_setting(10), 1023);
        assert_eq!(quantize(0.5, 10), 512);
        assert_eq!(quantize(0.0, 10), 0);
        assert_eq!(quantize(1.0, 10), 1023);
        assert_eq!(quantize(0.1, 10), 102);
    }

    #[test]
    fn test_bitstream_row_major() {
        let mut assignment = RowAssignment::new(2, 3);
        assignment.select(0, 2);
        assignment.select(1, 0);
        assert_eq!(assignment.bitstream(), "001100");
        assert_eq!(assignment.hexstream(), "30");
    }

    #[test]
    fn test_hexstream_pads_right() {
        let mut assignment = RowAssignment::new(1, 5);
        assignment.select(0, 4);
        // 00001 -> 0000 1000
        assert_eq!(assignment.hexstream(), "08");
    }

    #[test]
    fn test_empty_rows_are_zero() {
        let assignment = RowAssignment::new(16, 16);
        assert_eq!(assignment.hexstream(), "0".repeat(64));
        assert_eq!(assignment.ad8113(), "0".repeat(20));
    }

    #[test]
    fn test_ad8113_word() {
        let mut assignment = RowAssignment::new(16, 16);
        assignment.select(15, 3);
        assignment.select(0, 15);
        let word = assignment.ad8113();
        assert_eq!(word.len(), 20);
        // row 15 first: 1 0011, then 14 disabled rows, then row 0: 1 1111
        assert!(word.starts_with("98"));
        assert!(word.ends_with("1F"));
    }

    #[test]
    fn test_index_width() {
        assert_eq!(index_width(2), 1);
        assert_eq!(index_width(16), 4);
        assert_eq!(index_width(17), 5);
    }

    #[test]
    fn test_device_commands() {
        assert_eq!(
            DeviceCommand::Potentiometer { address: 0x0200, port: 10, value: 512 }.to_string(),
            "P02000A0512"
        );
        assert_eq!(
            DeviceCommand::Digital { address: 0x0010, port: 2, value: true }.to_string(),
            "D00102"
        );
        assert_eq!(
            DeviceCommand::Digital { address: 0x0010, port: 0, value: false }.to_string(),
            "d00100"
        );
        assert_eq!(
            DeviceCommand::Crossbar { address: 0x0040, word: "AB".to_string() }.to_string(),
            "X0040AB"
        );
    }

    #[test]
    fn test_widest_potentiometer_fits_command() {
        let value = max_setting(MAX_RESOLUTION_BITS);
        assert_eq!(value, 8191);
        let command = DeviceCommand::Potentiometer { address: 0x0200, port: 0, value }.to_string();
        assert_eq!(command, "P0200008191");
    }
}
