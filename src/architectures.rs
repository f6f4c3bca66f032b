//! Built-in machine descriptions
//!
//! `mini` is a small Analog Paradigm M-1 style machine: four summers, two
//! integrators, one integrator with built-in inverter (a macro), a
//! multiplier and a comparator, all switched through one 16×16 AD8113
//! crossbar, with a 24-channel potentiometer bank and a hybrid controller.

use crate::machine::{
    ConfigurablePart, Controller, Crossbar, CrossbarEncoding, EntityType, InputPort, IsA, Machine,
    MacroPart, MacroWire, OutputPort, Pin, PortRef, PotentiometerBank, PseudoPart, Requirement,
    WiredPart,
};

/// Names accepted by [`by_name`]
pub const REGISTERED: &[&str] = &["mini"];

/// Look up a registered architecture
pub fn by_name(name: &str) -> Option<Machine> {
    match name {
        "mini" => Some(mini()),
        _ => None,
    }
}

/// Entity catalog shared by the built-in machines
pub fn catalog() -> Vec<EntityType> {
    vec![
        EntityType::primitive("SUM")
            .formula("o = -(alpha*a + beta*b)")
            .input(InputPort::analog("a"))
            .input(InputPort::analog("b"))
            .input(InputPort::numeric("alpha"))
            .input(InputPort::numeric("beta"))
            .output(OutputPort::analog("o"))
            .default_input("a", PseudoPart::Disconnected)
            .default_input("b", PseudoPart::Disconnected)
            .default_input("alpha", 0.0)
            .default_input("beta", 0.0),
        EntityType::primitive("INV")
            .formula("o = -in")
            .input(InputPort::analog("in"))
            .output(OutputPort::analog("o")),
        EntityType::primitive("INT2m")
            .formula("o = -(ic_neg ? -ic : ic) - int(k*in + 10*k10*in10) dt")
            .input(InputPort::analog("in"))
            .input(InputPort::analog("in10"))
            .input(InputPort::numeric("k"))
            .input(InputPort::numeric("k10").with_weight(10.0))
            .input(InputPort::numeric("ic"))
            .input(InputPort::digital("ic_neg"))
            .output(OutputPort::analog("o"))
            .default_input("in10", PseudoPart::Disconnected)
            .default_input("k10", 0.0)
            .default_input("ic", 0.0)
            .default_input("ic_neg", false),
        EntityType::macro_type("INT2pm")
            .formula("o = INT2m(...), inv = -o")
            .input(InputPort::analog("in"))
            .input(InputPort::numeric("k"))
            .input(InputPort::numeric("ic"))
            .input(InputPort::digital("ic_neg"))
            .output(OutputPort::analog("o"))
            .output(OutputPort::analog("inv"))
            .default_input("ic", 0.0)
            .default_input("ic_neg", false)
            .part(
                MacroPart::new("int", "INT2m")
                    .wire("in", MacroWire::Input("in".to_string()))
                    .wire("k", MacroWire::Input("k".to_string()))
                    .wire("ic", MacroWire::Input("ic".to_string()))
                    .wire("ic_neg", MacroWire::Input("ic_neg".to_string())),
            )
            .part(MacroPart::new("neg", "INV").wire("in", MacroWire::Sibling(PortRef::new("int", "o"))))
            .export("o", PortRef::new("int", "o"))
            .export("inv", PortRef::new("neg", "o"))
            .is_a(IsA::new("INT2m").requires(Requirement::OutputUnused("inv".to_string()))),
        EntityType::primitive("MUL")
            .formula("o = -x*y")
            .input(InputPort::analog("x"))
            .input(InputPort::analog("y"))
            .output(OutputPort::analog("o")),
        EntityType::primitive("CMP")
            .formula("d = a + b > 0")
            .input(InputPort::analog("a"))
            .input(InputPort::analog("b"))
            .output(OutputPort::digital("d"))
            .default_input("b", PseudoPart::Disconnected),
        EntityType::pseudo("EXT")
            .formula("external analog input")
            .output(OutputPort::analog("o")),
    ]
}

/// The `mini` reference machine
pub fn mini() -> Machine {
    let mut machine = Machine::new("AP-M1-Mini");
    machine.entities = catalog();

    let mut parts = Vec::new();
    for i in 0..4u16 {
        parts.push(ConfigurablePart::new(format!("SUM{}", i), "SUM").address("o", 0x0100 + i));
    }
    for i in 0..2u16 {
        parts.push(ConfigurablePart::new(format!("INT{}", i), "INT2m").address("o", 0x0110 + i));
    }
    parts.push(
        ConfigurablePart::new("IP0", "INT2pm")
            .address("o", 0x0120)
            .address("inv", 0x0121),
    );
    parts.push(ConfigurablePart::new("MUL0", "MUL").address("o", 0x0130));
    parts.push(ConfigurablePart::new("CMP0", "CMP").address("d", 0x0140));
    parts.push(ConfigurablePart::new("EXT0", "EXT").address("o", 0x0150).fixed());
    machine.configurable_parts = parts;

    let mut columns = vec![
        Pin::output("SUM0"),
        Pin::output("SUM1"),
        Pin::output("SUM2"),
        Pin::output("SUM3"),
        Pin::output("INT0"),
        Pin::output("INT1"),
        Pin::port("IP0", "o"),
        Pin::port("IP0", "inv"),
        Pin::output("MUL0"),
        Pin::Pseudo(PseudoPart::PlusOne),
        Pin::Pseudo(PseudoPart::MinusOne),
        Pin::output("EXT0"),
    ];
    columns.resize(16, Pin::unused());

    let rows = vec![
        Pin::port("SUM0", "a"),
        Pin::port("SUM0", "b"),
        Pin::port("SUM1", "a"),
        Pin::port("SUM1", "b"),
        Pin::port("SUM2", "a"),
        Pin::port("SUM2", "b"),
        Pin::port("SUM3", "a"),
        Pin::port("SUM3", "b"),
        Pin::port("INT0", "in"),
        Pin::port("INT0", "in10"),
        Pin::port("INT1", "in"),
        Pin::port("IP0", "in"),
        Pin::port("MUL0", "x"),
        Pin::port("MUL0", "y"),
        Pin::port("CMP0", "a"),
        Pin::port("CMP0", "b"),
    ];

    let mut dpt = Vec::new();
    for i in 0..4 {
        dpt.push(Pin::port(format!("SUM{}", i), "alpha"));
        dpt.push(Pin::port(format!("SUM{}", i), "beta"));
    }
    for i in 0..2 {
        dpt.push(Pin::port(format!("INT{}", i), "k"));
        dpt.push(Pin::port(format!("INT{}", i), "k10"));
    }
    dpt.push(Pin::port("IP0", "k"));

    let mut hc = Controller::new("HC", 0x0010);
    hc.potentiometers = vec![Pin::port("INT0", "ic"), Pin::port("INT1", "ic"), Pin::port("IP0", "ic")];
    hc.digital_outputs = vec![
        Pin::port("INT0", "ic_neg"),
        Pin::port("INT1", "ic_neg"),
        Pin::port("IP0", "ic_neg"),
    ];
    hc.digital_inputs = vec![Pin::port("CMP0", "d")];

    machine.wired_parts = vec![
        WiredPart::Crossbar(Crossbar::new("XBAR0", 0x0040, columns, rows).with_encoding(CrossbarEncoding::Ad8113)),
        WiredPart::PotentiometerBank(PotentiometerBank::new("DPT0", 0x0200, 24, dpt)),
        WiredPart::Controller(hc),
    ];
    machine
}
