//! Unified data service
//!
//! Every panel query goes through [`DataArbitrator::fetch`], which returns a
//! [`DataResponse`] tagged `live`, `mock`, `loading` or `error` so the panel
//! can render a provenance badge. Failures are returned as data, never raised.

pub mod arbitrator;
pub mod response;
pub mod sources;

pub use arbitrator::{DataArbitrator, FetchOptions, CANCELLED};
pub use response::{DataResponse, DataStatus};
pub use sources::{HttpSource, SampleStore, SourceError};
