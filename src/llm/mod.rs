pub mod ollama;
pub mod provisioner;
pub mod pull;
pub mod registry;
pub mod stream;

pub use ollama::OllamaClient;
pub use provisioner::{ ModelProvisioner, PollSettings, Provisioned };
pub use pull::{ ApiPull, CommandPull, PullAction, PullOutcome, PullVia };
pub use registry::{ Availability, ModelCatalog, ModelRegistry };
pub use stream::{ ChunkStream, ControlTokens, StreamDecoder };
