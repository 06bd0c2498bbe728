pub mod chat;
pub mod generation;
pub mod model_ref;

pub use chat::{ Attachment, Message, Role };
pub use generation::{ Endpoint, GenerationRequest, GenerationStats, StreamChunk, StreamFailure };
pub use model_ref::ModelRef;
