pub mod error;
pub mod handlers;
pub mod router;
pub mod xml;

pub use router::s3_router;
