pub mod error;
pub mod hash;
pub mod time;
pub mod types;

pub use error::{DiskError, ErrorKind, MinnowError, Result};
pub use types::{BucketInfo, ObjectInfo, ObjectPartInfo};
