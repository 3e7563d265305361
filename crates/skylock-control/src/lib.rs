pub mod mapper;
pub mod node;
pub mod safety;

pub use mapper::{ControlConfig, ControlGains, ControlLimits, ControlMapper};
pub use node::{ControlNode, ControlNodeConfig};
pub use safety::{SafetyConfig, SafetyManager};
