//! Compilation trace
//!
//! Every decision the compiler takes is recorded here in order, and echoed
//! to the `tracing` subscriber, so that a configuration can be explained
//! after the fact.

use serde::{Deserialize, Serialize};

/// How a program part ended up on its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchRule {
    /// The slot has the requested type
    Exact,
    /// The slot's type declares that it is-a the requested type
    Substitute,
    /// The requested type declares that it is-a the slot's type
    Reduce,
}

impl std::fmt::Display for MatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRule::Exact => write!(f, "exact"),
            MatchRule::Substitute => write!(f, "substitute"),
            MatchRule::Reduce => write!(f, "reduce"),
        }
    }
}

/// One recorded decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Allocated {
        part: String,
        entity: String,
        slot: String,
        slot_entity: String,
        rule: MatchRule,
    },
    Expanded {
        part: String,
        primitives: usize,
        nets: usize,
        settings: usize,
    },
    Routed {
        crossbar: String,
        row: usize,
        column: usize,
        source: String,
        destination: String,
    },
    CoefficientResolved {
        part: String,
        port: String,
        coefficient: Option<String>,
        value: f64,
        target: String,
        slot: usize,
        destination: String,
        setting: u32,
    },
    DigitalResolved {
        part: String,
        port: String,
        value: bool,
        target: String,
        slot: usize,
        destination: String,
    },
    Observable {
        name: String,
        part: String,
        slot: String,
        port: String,
        address: u16,
    },
}

impl std::fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraceEvent::Allocated { part, entity, slot, slot_entity, rule } => {
                write!(f, "allocate {} ({}) -> {} ({}, {})", part, entity, slot, slot_entity, rule)
            }
            TraceEvent::Expanded { part, primitives, nets, settings } => write!(
                f,
                "expand {}: {} primitives, {} nets, {} settings",
                part, primitives, nets, settings
            ),
            TraceEvent::Routed { crossbar, row, column, source, destination } => write!(
                f,
                "route {} -> {} via {} row {} column {}",
                source, destination, crossbar, row, column
            ),
            TraceEvent::CoefficientResolved {
                part,
                port,
                coefficient,
                value,
                target,
                slot,
                destination,
                setting,
            } => {
                write!(f, "coefficient {}:{} = ", part, port)?;
                if let Some(name) = coefficient {
                    write!(f, "${} = ", name)?;
                }
                write!(f, "{} -> {}[{}] ({}) = {}", value, target, slot, destination, setting)
            }
            TraceEvent::DigitalResolved { part, port, value, target, slot, destination } => write!(
                f,
                "digital {}:{} = {} -> {}[{}] ({})",
                part, port, value, target, slot, destination
            ),
            TraceEvent::Observable { name, part, slot, port, address } => write!(
                f,
                "observable {} = {} -> {}:{} at 0x{:04X}",
                name, part, slot, port, address
            ),
        }
    }
}

/// Ordered record of compilation decisions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileTrace {
    pub events: Vec<TraceEvent>,
}

impl CompileTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: TraceEvent) {
        tracing::info!("{}", event);
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }
}

impl std::fmt::Display for CompileTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for event in &self.events {
            writeln!(f, "{}", event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = TraceEvent::Routed {
            crossbar: "XBAR0".to_string(),
            row: 2,
            column: 4,
            source: "INT0:o".to_string(),
            destination: "SUM1:a".to_string(),
        };
        assert_eq!(event.to_string(), "route INT0:o -> SUM1:a via XBAR0 row 2 column 4");
    }

    #[test]
    fn test_record_keeps_order() {
        let mut trace = CompileTrace::new();
        trace.record(TraceEvent::Expanded {
            part: "S1".to_string(),
            primitives: 1,
            nets: 0,
            settings: 2,
        });
        trace.record(TraceEvent::Observable {
            name: "x".to_string(),
            part: "S1".to_string(),
            slot: "SUM0".to_string(),
            port: "o".to_string(),
            address: 0x0100,
        });
        assert_eq!(trace.len(), 2);
        assert!(trace.to_string().ends_with("at 0x0100\n"));
    }
}
