// Property-based tests for compiler invariants.
//
// 1. Routing: every row of a routed crossbar selects at most one column,
//    and each routed net's row selects the net's source column
// 2. Quantization: settings stay in range and round-trip within half a step
// 3. Allocation: deterministic, and no slot is used twice
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use std::collections::{BTreeMap, BTreeSet};

use fpaa_compiler::hardware::{dequantize, max_setting, quantize};
use fpaa_compiler::layout::CrossbarLayout;
use fpaa_compiler::machine::MAX_RESOLUTION_BITS;
use fpaa_compiler::{architectures, Allocator, CompileError, CompileTrace, MachineLayout, Net, Program, ProgramPart, Router};
use proptest::prelude::*;

// ── Test helpers ────────────────────────────────────────────────────────────

fn mini_crossbar() -> CrossbarLayout {
    let layout = MachineLayout::new(&architectures::mini()).unwrap();
    layout.crossbars[0].clone()
}

/// Net from a used column into the first destination of `row`
fn net(xbar: &CrossbarLayout, column: usize, row: usize) -> Option<Net> {
    let source = xbar.columns[column].clone()?;
    let destination = xbar.rows[row].first()?.clone();
    Some(Net::new(source, destination))
}

fn config() -> ProptestConfig {
    ProptestConfig {
        cases: 128,
        ..ProptestConfig::default()
    }
}

// ── Routing ─────────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn prop_distinct_rows_always_route(pairs in prop::collection::vec((0usize..12, 0usize..16), 0..16)) {
        let xbar = mini_crossbar();
        let by_row: BTreeMap<usize, usize> = pairs.into_iter().map(|(c, r)| (r, c)).collect();
        let nets: Vec<Net> = by_row.iter().filter_map(|(&r, &c)| net(&xbar, c, r)).collect();

        let crossbars = vec![xbar];
        let configs = Router::new(&crossbars).route(&nets, &mut CompileTrace::new()).unwrap();
        let assignment = &configs[0].assignment;

        prop_assert_eq!(assignment.active_rows(), by_row.len());
        for (row, column) in by_row {
            prop_assert_eq!(assignment.selected[row], Some(column));
        }
    }

    #[test]
    fn prop_rows_are_one_hot(pairs in prop::collection::vec((0usize..12, 0usize..16), 0..32)) {
        let xbar = mini_crossbar();
        let nets: Vec<Net> = pairs.iter().filter_map(|&(c, r)| net(&xbar, c, r)).collect();
        let crossbars = vec![xbar];

        match Router::new(&crossbars).route(&nets, &mut CompileTrace::new()) {
            Ok(configs) => {
                let config = &configs[0];
                let bits: Vec<char> = config.bitstream.chars().collect();
                for row in bits.chunks(config.assignment.columns) {
                    prop_assert!(row.iter().filter(|&&b| b == '1').count() <= 1);
                }
                let rows: BTreeSet<usize> = pairs.iter().map(|&(_, r)| r).collect();
                prop_assert_eq!(config.assignment.active_rows(), rows.len());
            }
            Err(CompileError::ConflictingInputs { sources, .. }) => {
                prop_assert!(sources.len() >= 2);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }
}

// ── Quantization ────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(config())]

    #[test]
    fn prop_quantize_round_trip(fraction in 0.0f64..=1.0, bits in 1u32..=MAX_RESOLUTION_BITS) {
        let setting = quantize(fraction, bits);
        prop_assert!(setting <= max_setting(bits));
        let step = 1.0 / max_setting(bits) as f64;
        prop_assert!((dequantize(setting, bits) - fraction).abs() <= step / 2.0 + 1e-12);
    }

    #[test]
    fn prop_quantize_is_monotonic(a in 0.0f64..=1.0, b in 0.0f64..=1.0, bits in 1u32..=MAX_RESOLUTION_BITS) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(quantize(lo, bits) <= quantize(hi, bits));
    }
}

// ── Allocation ──────────────────────────────────────────────────────────────

fn arb_program() -> impl Strategy<Value = Program> {
    let entity = prop_oneof![Just("SUM"), Just("INT2m"), Just("INT2pm"), Just("MUL"), Just("CMP")];
    prop::collection::vec(entity, 0..10).prop_map(|entities| {
        entities
            .into_iter()
            .enumerate()
            .fold(Program::new("random"), |program, (i, entity)| {
                program.part(ProgramPart::new(format!("P{}", i), entity))
            })
    })
}

proptest! {
    #![proptest_config(config())]

    #[test]
    fn prop_allocation_is_deterministic(program in arb_program()) {
        let machine = architectures::mini();
        let first = Allocator::new(&machine).allocate(&program, &mut CompileTrace::new());
        let second = Allocator::new(&machine).allocate(&program, &mut CompileTrace::new());

        match (first, second) {
            (Ok(a), Ok(b)) => {
                prop_assert_eq!(&a, &b);
                let slots: BTreeSet<&str> = a.placements.iter().map(|p| p.slot.as_str()).collect();
                prop_assert_eq!(slots.len(), a.placements.len());
            }
            (Err(CompileError::ResourceExhausted { part: a, .. }), Err(CompileError::ResourceExhausted { part: b, .. })) => {
                prop_assert_eq!(a, b);
            }
            (a, b) => prop_assert!(false, "diverging results {:?} / {:?}", a, b),
        }
    }
}
