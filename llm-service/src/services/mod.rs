pub mod gateway;
pub mod material;
pub mod metrics;
pub mod providers;
pub mod registry;
pub mod relay;

pub use gateway::{LlmError, LlmGateway};
pub use material::MaterialInput;
pub use registry::{Pull, RegistryError, SessionLease, SessionRegistry};
pub use relay::{RelayState, StreamRelay};
