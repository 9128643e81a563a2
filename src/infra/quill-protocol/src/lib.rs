pub mod delta;
pub mod error;
pub mod payload;
pub mod transcript;

pub use delta::{decode_delta, encode_delta, DeltaPayload, StreamDelta};
pub use error::ProtocolError;
pub use payload::{
    Decision, ErrorKind, ErrorPayload, QuestionAnswer, ToolDecision, ToolResultPayload,
};
pub use transcript::{EntryRole, TranscriptEntry};
