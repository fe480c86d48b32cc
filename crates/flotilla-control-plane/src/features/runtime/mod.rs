pub mod repo;

pub use repo::{ContainerRuntime, InMemoryContainerRuntime, RuntimeError, RuntimeResult};
