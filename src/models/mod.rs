//! # Data Model
//!
//! Explicit value objects for the fiche navette aggregate. Repositories return
//! these fully populated; nothing is loaded lazily behind a field access.

pub mod prestation_package;
pub mod service_request;
pub mod service_request_item;

pub use prestation_package::PrestationPackage;
pub use service_request::{RequestSnapshot, ServiceRequest};
pub use service_request_item::{ItemStatus, NewServiceRequestItem, ServiceRequestItem};
