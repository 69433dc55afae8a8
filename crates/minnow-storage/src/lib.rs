pub mod conditional;
pub mod config;
pub mod disk;
pub mod erasure;
pub mod naming;
pub mod nslock;
pub mod range;
pub mod traits;

pub use config::{MultipartConfig, ObjectLayerConfig};
pub use erasure::ErasureConfig;
pub use erasure::objects::ErasureObjectLayer;
pub use erasure::storage::ErasureSet;
pub use traits::ObjectLayer;
