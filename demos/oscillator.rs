//! Example: Harmonic Oscillator
//!
//! Compiles y'' = -k²y onto the built-in `mini` machine: the integrator
//! with built-in inverter feeds a plain integrator, which feeds back into
//! the first one. A comparator watches the sign of y.
//!
//! Run with: cargo run --example oscillator

use fpaa_compiler::{architectures, Compiler, InputBinding, Program, ProgramPart};

fn main() {
    println!("=== Harmonic Oscillator Example ===\n");

    let machine = architectures::mini();
    let compiler = Compiler::new(&machine).unwrap();

    // A:o = -k∫y, A:inv = k∫y, y = -k∫A:inv
    let program = Program::new("oscillator")
        .coefficient("k", 0.5)
        .part(
            ProgramPart::new("A", "INT2pm")
                .input("in", InputBinding::part("Y"))
                .input("k", InputBinding::coefficient("k"))
                .input("ic", 0.5),
        )
        .part(
            ProgramPart::new("Y", "INT2m")
                .input("in", InputBinding::reference("A", "inv"))
                .input("k", InputBinding::coefficient("k")),
        )
        .part(ProgramPart::new("Z", "CMP").input("a", InputBinding::part("Y")))
        .observe("y", InputBinding::part("Y"))
        .observe("dy", InputBinding::reference("A", "o"))
        .observe("positive", InputBinding::part("Z"));

    println!("Program document:");
    println!("{}\n", program.to_json().unwrap());

    let config = compiler.compile(&program).unwrap();
    println!("{}", config);

    println!("Crossbar:");
    println!("{}", config.diagram());

    println!("Device commands:");
    print!("{}", config.command_stream());
    println!();

    println!("Trace:");
    print!("{}", config.trace);
}
