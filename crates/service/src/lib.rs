pub mod attribute_map;
pub mod cardinality;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod metrics;
pub mod projection;
pub mod service;
pub mod update;

pub use error::ServiceError;
pub use service::{EntityQueryService, RequestContext};
