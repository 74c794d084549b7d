pub mod probe;
pub mod registry;


// Re-export the discovery entry points
pub use probe::{DeviceProbe, SimulatedProbe, SysBlockProbe};
pub use registry::DeviceRegistry;
