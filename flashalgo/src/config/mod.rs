//! Target descriptions and the registry of known chips.

mod registry;
mod target;

pub use registry::{Registry, RegistryError};
pub use target::Target;
