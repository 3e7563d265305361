pub mod depth;
pub mod errors;
pub mod lock;
pub mod node;

pub use depth::{DepthFrame, DepthSource};
pub use errors::{ErrorComputer, RangeConfig};
pub use lock::{LockConfig, LockManager};
pub use node::{TargetingNode, TargetingNodeConfig};
