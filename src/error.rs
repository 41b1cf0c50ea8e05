use thiserror::Error;

#[derive(Error, Debug)]
pub enum TextgenError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("corpus is empty")]
    EmptyCorpus,

    #[error("corpus of {len} symbols cannot fill one mini-batch of {needed}")]
    CorpusTooShort { len: usize, needed: usize },

    #[error("alphabet has {alphabet} symbols but the network expects {network}")]
    AlphabetMismatch { alphabet: usize, network: usize },

    #[error("byte 0x{0:02x} is not part of the alphabet")]
    UnknownByte(u8),

    #[error("invalid alphabet table: {0}")]
    InvalidAlphabet(String),

    #[error("shape mismatch: expected {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("symbol {symbol} is outside an alphabet of {width}")]
    SymbolOutOfRange { symbol: usize, width: usize },

    #[error("step {step} is outside the unrolled window of {depth}")]
    StepOutOfRange { step: usize, depth: usize },

    #[error("non-finite cost {cost} in epoch {epoch}")]
    NonFiniteCost { epoch: usize, cost: f32 },

    #[error("non-finite gradient in epoch {epoch}")]
    NonFiniteGradient { epoch: usize },

    #[error("degenerate output distribution (sum {0})")]
    DegenerateDistribution(f32),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TextgenError>;

impl From<bincode::Error> for TextgenError {
    fn from(e: bincode::Error) -> Self {
        TextgenError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for TextgenError {
    fn from(e: serde_json::Error) -> Self {
        TextgenError::Serialization(e.to_string())
    }
}
