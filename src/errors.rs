use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("ISA Load Error: {reason}")]
    IsaLoad { reason: String },

    #[error("Validation Error: {reason}")]
    Validation { reason: String },

    #[error("Parse Error in {file} at line {line}, column {column}: {reason}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        reason: String,
    },

    #[error("Symbol Error on line {line}: {reason}")]
    Symbol { line: usize, reason: String },

    #[error("Symbol Error: {reason}")]
    SymbolNoLine { reason: String },

    #[error("Encoding Error on line {line}: {reason}")]
    Encoding { line: usize, reason: String },

    #[error("Decoding Error at address 0x{address:04X}: {reason}")]
    Decoding { address: u32, reason: String },

    #[error("Sandbox Error: {reason}")]
    Sandbox { reason: String },

    #[error("Bit Field Error: {reason}")]
    BitField { reason: String },

    #[error("assembly cancelled")]
    Cancelled,

    #[error("{count} errors occurred:\n{listing}")]
    Collected { count: usize, listing: String },
}
