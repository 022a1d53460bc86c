mod options;
mod registry;

pub use options::RegistryOptions;
pub use registry::ClusterRegistry;
pub use registry::ClusterRegistryConfig;
pub use registry::RegistryCreationError;
pub use registry::RegistryListener;
