//! Error types for the FPAA compiler

use thiserror::Error;

/// Result type for compilation operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Compilation errors
///
/// All of these are deterministic structural faults in either the machine
/// description or the program. A compile aborts on the first one and never
/// emits a partial configuration.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Lexer error at position {position}: {message}")]
    LexerError { position: usize, message: String },

    #[error("Parser error: {message}")]
    ParseError { message: String },

    #[error("Invalid document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Malformed machine description: {message}")]
    MalformedMachine { message: String },

    #[error("Duplicate name '{name}' in {context}")]
    DuplicateName { name: String, context: String },

    #[error("Unknown entity type '{name}' ({context})")]
    UnknownEntityType { name: String, context: String },

    #[error("Unknown part '{name}' ({context})")]
    UnknownPart { name: String, context: String },

    #[error("Part {part} of type {entity} has no port '{port}'")]
    UnknownPort {
        part: String,
        entity: String,
        port: String,
    },

    #[error("Unknown coefficient '{name}' used by part {part}")]
    UnknownCoefficient { name: String, part: String },

    #[error("Macro {entity}: unresolved internal reference {reference}")]
    UnresolvedMacroReference { entity: String, reference: String },

    #[error("Have used up all {capacity} allocatable parts for part {part} of type {entity}")]
    ResourceExhausted {
        part: String,
        entity: String,
        capacity: usize,
    },

    #[error("Part {part}, input {port}: expected {expected}, got {found}")]
    PortKindMismatch {
        part: String,
        port: String,
        expected: String,
        found: String,
    },

    #[error("Part {part} (architecture part {slot}): input {port} is not connected and has no default")]
    MissingInput {
        part: String,
        slot: String,
        port: String,
    },

    #[error("Cannot route {signal} -> {destination}: {reason}")]
    UnroutableSignal {
        signal: String,
        destination: String,
        reason: String,
    },

    #[error("Conflicting inputs for {destination}: driven by {}", .sources.join(", "))]
    ConflictingInputs {
        destination: String,
        sources: Vec<String>,
    },

    #[error("Part {part}, input {port}: coefficient {value} out of range [{min}, {max}] at weight {weight}{hint}")]
    CoefficientOutOfRange {
        part: String,
        port: String,
        value: f64,
        weight: f64,
        min: f64,
        max: f64,
        hint: String,
    },

    #[error("Part {part}, input {port}: no potentiometer or digital output is wired to {destination}")]
    CoefficientNotConfigurable {
        part: String,
        port: String,
        destination: String,
    },

    #[error("Observable {observable}: architecture part {slot} has no readout address for output {port}")]
    MissingAddress {
        observable: String,
        slot: String,
        port: String,
    },
}

impl CompileError {
    pub fn parse_error(msg: impl Into<String>) -> Self {
        CompileError::ParseError { message: msg.into() }
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        CompileError::MalformedMachine { message: msg.into() }
    }

    pub fn unknown_entity(name: impl Into<String>, context: impl Into<String>) -> Self {
        CompileError::UnknownEntityType {
            name: name.into(),
            context: context.into(),
        }
    }

    pub fn unknown_part(name: impl Into<String>, context: impl Into<String>) -> Self {
        CompileError::UnknownPart {
            name: name.into(),
            context: context.into(),
        }
    }

    pub fn unknown_port(
        part: impl Into<String>,
        entity: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        CompileError::UnknownPort {
            part: part.into(),
            entity: entity.into(),
            port: port.into(),
        }
    }

    pub fn unresolved(entity: impl Into<String>, reference: impl Into<String>) -> Self {
        CompileError::UnresolvedMacroReference {
            entity: entity.into(),
            reference: reference.into(),
        }
    }

    pub fn unroutable(
        signal: impl ToString,
        destination: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        CompileError::UnroutableSignal {
            signal: signal.to_string(),
            destination: destination.to_string(),
            reason: reason.into(),
        }
    }
}
