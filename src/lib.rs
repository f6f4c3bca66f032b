//! FPAA Circuit Compiler
//!
//! This library compiles analog computer programs (circuits of summers,
//! integrators, multipliers, ...) onto a field-programmable analog array:
//! it allocates program parts to physical computing elements, expands
//! macros, routes signals through crossbar switch matrices, quantizes
//! coefficients onto digital potentiometers and emits the resulting
//! configuration.
//!
//! # Example
//!
//! ```rust
//! use fpaa_compiler::{architectures, compile, Program, ProgramPart, PseudoPart};
//!
//! let machine = architectures::mini();
//! let program = Program::new("ramp").part(
//!     ProgramPart::new("S1", "SUM")
//!         .input("a", PseudoPart::PlusOne)
//!         .input("alpha", 0.5)
//!         .input("b", PseudoPart::MinusOne)
//!         .input("beta", 0.5),
//! );
//! let config = compile(&machine, &program).unwrap();
//! println!("{}", config);
//! ```

pub mod allocator;
pub mod architectures;
pub mod codegen;
pub mod coefficients;
pub mod error;
pub mod expander;
pub mod hardware;
pub mod layout;
pub mod lexer;
pub mod machine;
pub mod parser;
pub mod program;
pub mod router;
pub mod trace;

pub use allocator::{Allocation, Allocator, Placement};
pub use codegen::CodeGenerator;
pub use coefficients::CoefficientResolver;
pub use error::{CompileError, CompileResult};
pub use expander::{ExpandedCircuit, Expander, Net, Provenance};
pub use hardware::{CrossbarConfig, DeviceCommand, HardwareConfig, RowAssignment};
pub use layout::MachineLayout;
pub use machine::{EntityType, Machine, Pin, PortRef, PseudoPart};
pub use parser::Parser;
pub use program::{InputBinding, Program, ProgramPart};
pub use router::Router;
pub use trace::{CompileTrace, MatchRule, TraceEvent};

/// A compiler bound to one validated machine description.
///
/// Compiling takes `&self`, so a single compiler can serve any number of
/// programs, from any number of threads.
pub struct Compiler<'m> {
    machine: &'m Machine,
    layout: MachineLayout,
}

impl<'m> Compiler<'m> {
    /// Validate the machine and precompute its physical layout
    pub fn new(machine: &'m Machine) -> CompileResult<Self> {
        machine.validate()?;
        let layout = MachineLayout::new(machine)?;
        tracing::debug!(
            "machine {}: {} entity types, {} configurable parts, {} crossbars",
            machine.title,
            machine.entities.len(),
            machine.configurable_parts.len(),
            layout.crossbars.len()
        );
        Ok(Self { machine, layout })
    }

    pub fn machine(&self) -> &Machine {
        self.machine
    }

    pub fn layout(&self) -> &MachineLayout {
        &self.layout
    }

    /// Run allocate -> expand -> route -> resolve coefficients -> emit
    pub fn compile(&self, program: &Program) -> CompileResult<HardwareConfig> {
        let mut trace = CompileTrace::new();

        // Place program parts on physical slots
        let allocation = Allocator::new(self.machine).allocate(program, &mut trace)?;

        // Unfold macros into primitives and nets
        let circuit = Expander::new(self.machine, program).expand(&allocation, &mut trace)?;
        tracing::debug!(
            "expanded {}: {} primitives, {} nets, {} settings",
            program.title,
            circuit.instances.len(),
            circuit.nets.len(),
            circuit.settings.len()
        );

        // Select crossbar switches
        let crossbars = Router::new(&self.layout.crossbars).route(&circuit.nets, &mut trace)?;

        // Quantize potentiometers, set digital outputs
        let values = CoefficientResolver::new(self.machine, &self.layout).resolve(&circuit, &mut trace)?;

        CodeGenerator::new(self.machine, &self.layout).generate(program, &allocation, crossbars, values, trace)
    }
}

/// Main compilation function: validate `machine` and compile `program` onto it
pub fn compile(machine: &Machine, program: &Program) -> CompileResult<HardwareConfig> {
    Compiler::new(machine)?.compile(program)
}
