//! Crossbar routing
//!
//! Every program net must reach its destination through a crossbar: some
//! output row drives the destination, and the net's source must be available
//! on one of that crossbar's input columns. The column is then selected for
//! the row. Rows are independent, so one column may feed many rows, but a
//! row (and a destination) accepts exactly one source.
//!
//! Nets created by macro internals are hard-wired; they only occupy a row if
//! the machine routes that internal input through a crossbar.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CompileError, CompileResult};
use crate::expander::{Net, Provenance};
use crate::hardware::{CrossbarConfig, RowAssignment};
use crate::layout::CrossbarLayout;
use crate::machine::{Endpoint, PortRef};
use crate::trace::{CompileTrace, TraceEvent};

/// Router over the crossbars of one machine
pub struct Router<'a> {
    crossbars: &'a [CrossbarLayout],
}

impl<'a> Router<'a> {
    pub fn new(crossbars: &'a [CrossbarLayout]) -> Self {
        Self { crossbars }
    }

    /// Select at most one column per row so that every program net is
    /// realized
    pub fn route(&self, nets: &[Net], trace: &mut CompileTrace) -> CompileResult<Vec<CrossbarConfig>> {
        let by_destination = index_destinations(nets)?;
        let mut claimed: BTreeSet<&PortRef> = BTreeSet::new();
        let mut configs = Vec::with_capacity(self.crossbars.len());

        for xbar in self.crossbars {
            let mut assignment = RowAssignment::new(xbar.rows.len(), xbar.columns.len());

            for (row, destinations) in xbar.rows.iter().enumerate() {
                let driving: Vec<&Net> = destinations
                    .iter()
                    .filter_map(|d| by_destination.get(d).copied())
                    .collect();
                let sources: BTreeSet<&Endpoint> = driving.iter().map(|n| &n.source).collect();

                let source = match sources.len() {
                    0 => continue,
                    1 => driving[0].source.clone(),
                    _ => {
                        return Err(CompileError::ConflictingInputs {
                            destination: format!("{} row {} ({})", xbar.name, row, xbar.row_labels[row]),
                            sources: sources.iter().map(|s| s.to_string()).collect(),
                        })
                    }
                };

                let column = xbar.column_of(&source).ok_or_else(|| {
                    CompileError::unroutable(
                        &source,
                        &driving[0].destination,
                        format!("no input column of {} carries this source", xbar.name),
                    )
                })?;
                assignment.select(row, column);

                for net in &driving {
                    claimed.insert(&net.destination);
                    trace.record(TraceEvent::Routed {
                        crossbar: xbar.name.clone(),
                        row,
                        column,
                        source: net.source.to_string(),
                        destination: net.destination.to_string(),
                    });
                }
            }

            configs.push(CrossbarConfig::new(xbar, assignment));
        }

        for net in nets {
            if net.provenance == Provenance::Program && !claimed.contains(&net.destination) {
                return Err(CompileError::unroutable(
                    &net.source,
                    &net.destination,
                    format!("no crossbar row drives input {} of part {}", net.port, net.part),
                ));
            }
        }
        Ok(configs)
    }
}

/// Each destination may be driven by a single net
fn index_destinations(nets: &[Net]) -> CompileResult<BTreeMap<&PortRef, &Net>> {
    let mut index: BTreeMap<&PortRef, &Net> = BTreeMap::new();
    for net in nets {
        if let Some(previous) = index.insert(&net.destination, net) {
            return Err(CompileError::ConflictingInputs {
                destination: net.destination.to_string(),
                sources: vec![previous.source.to_string(), net.source.to_string()],
            });
        }
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{CrossbarEncoding, PseudoPart};
    use pretty_assertions::assert_eq;

    fn port(part: &str, port: &str) -> PortRef {
        PortRef::new(part, port)
    }

    fn source(part: &str) -> Endpoint {
        Endpoint::Port(port(part, "o"))
    }

    /// 3 columns (A, B, +1) by 3 rows (X:a, X:b, Y:a)
    fn small_crossbar() -> CrossbarLayout {
        CrossbarLayout {
            name: "XB".to_string(),
            address: 0x0040,
            encoding: CrossbarEncoding::OneHot,
            columns: vec![Some(source("A")), Some(source("B")), Some(Endpoint::Pseudo(PseudoPart::PlusOne))],
            rows: vec![vec![port("X", "a")], vec![port("X", "b")], vec![port("Y", "a")]],
            column_labels: vec!["A".to_string(), "B".to_string(), "+1".to_string()],
            row_labels: vec!["X:a".to_string(), "X:b".to_string(), "Y:a".to_string()],
        }
    }

    fn route(nets: &[Net]) -> CompileResult<Vec<CrossbarConfig>> {
        let crossbars = vec![small_crossbar()];
        Router::new(&crossbars).route(nets, &mut CompileTrace::new())
    }

    #[test]
    fn test_single_net() {
        let configs = route(&[Net::new(source("B"), port("X", "b"))]).unwrap();
        assert_eq!(configs[0].assignment.selected, vec![None, Some(1), None]);
    }

    #[test]
    fn test_one_column_feeds_many_rows() {
        let configs = route(&[
            Net::new(source("A"), port("X", "a")),
            Net::new(source("A"), port("Y", "a")),
        ])
        .unwrap();
        assert_eq!(configs[0].assignment.selected, vec![Some(0), None, Some(0)]);
    }

    #[test]
    fn test_pseudo_source_column() {
        let configs = route(&[Net::new(Endpoint::Pseudo(PseudoPart::PlusOne), port("Y", "a"))]).unwrap();
        assert_eq!(configs[0].assignment.selected, vec![None, None, Some(2)]);
    }

    #[test]
    fn test_source_without_column() {
        let err = route(&[Net::new(source("C"), port("X", "a"))]).unwrap_err();
        assert!(matches!(err, CompileError::UnroutableSignal { .. }));
    }

    #[test]
    fn test_destination_without_row() {
        let err = route(&[Net::new(source("A"), port("Z", "a"))]).unwrap_err();
        match err {
            CompileError::UnroutableSignal { signal, destination, .. } => {
                assert_eq!(signal, "A:o");
                assert_eq!(destination, "Z:a");
            }
            other => panic!("expected unroutable, got {:?}", other),
        }
    }

    #[test]
    fn test_hardwired_net_needs_no_row() {
        let mut net = Net::new(source("A"), port("Z", "a"));
        net.provenance = Provenance::Machine;
        let configs = route(&[net]).unwrap();
        assert!(configs[0].assignment.selected.iter().all(Option::is_none));
    }

    #[test]
    fn test_two_sources_one_destination() {
        let err = route(&[
            Net::new(source("A"), port("X", "a")),
            Net::new(source("B"), port("X", "a")),
        ])
        .unwrap_err();
        assert!(matches!(err, CompileError::ConflictingInputs { .. }));
    }

    #[test]
    fn test_two_sources_one_shared_row() {
        let mut xbar = small_crossbar();
        xbar.rows[0] = vec![port("X", "a"), port("W", "a")];
        let crossbars = vec![xbar];
        let err = Router::new(&crossbars)
            .route(
                &[
                    Net::new(source("A"), port("X", "a")),
                    Net::new(source("B"), port("W", "a")),
                ],
                &mut CompileTrace::new(),
            )
            .unwrap_err();
        match err {
            CompileError::ConflictingInputs { sources, .. } => {
                assert_eq!(sources, vec!["A:o".to_string(), "B:o".to_string()]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_routing_is_traced() {
        let crossbars = vec![small_crossbar()];
        let mut trace = CompileTrace::new();
        Router::new(&crossbars)
            .route(&[Net::new(source("A"), port("X", "b"))], &mut trace)
            .unwrap();
        assert_eq!(trace.len(), 1);
    }
}
