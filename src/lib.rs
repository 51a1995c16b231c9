#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Navette Core
//!
//! Service requests ("fiches navettes") and their automatic conversion into
//! prestation packages.
//!
//! ## Overview
//!
//! A fiche navette collects the prestations ordered for a patient. When the
//! prestations on a request cover a predefined package, a background job
//! replaces the individual items with a single package item at the package
//! price and moves the request total accordingly. Package items can themselves
//! be absorbed by a larger package (cascading conversion).
//!
//! ## Module Organization
//!
//! - [`models`] - Requests, items and package definitions
//! - [`store`] - Persistence seam with in-memory and PostgreSQL providers
//! - [`conversion`] - Package matching, transactional replacement and totals
//! - [`observer`] - Total maintenance and job scheduling on item writes
//! - [`jobs`] - Bounded-retry background job runner with a dead-letter queue
//! - [`service`] - Caller-facing operations
//! - [`events`] - Domain event publishing
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use navette_core::config::NavetteConfig;
//! use navette_core::events::EventPublisher;
//! use navette_core::models::NewServiceRequestItem;
//! use navette_core::service::FicheNavetteService;
//! use navette_core::store::InMemoryStore;
//! use rust_decimal::Decimal;
//!
//! # async fn example() -> navette_core::Result<()> {
//! let config = NavetteConfig::default();
//! let events = EventPublisher::new(config.events.channel_capacity);
//! let service = FicheNavetteService::new(Arc::new(InMemoryStore::new()), &config, events);
//!
//! let request = service.create_request(42).await?;
//! let added = service
//!     .add_items(
//!         request.fiche_navette_id,
//!         vec![NewServiceRequestItem::prestation(1, Some(7), Decimal::new(1000, 2))],
//!     )
//!     .await?;
//! println!("total is now {}", added.total.new_total);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod config;
pub mod constants;
pub mod conversion;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod observer;
pub mod service;
pub mod store;

pub use config::{ConfigManager, NavetteConfig};
pub use conversion::{
    ConversionDecision, ConversionExecutor, ConversionOutcome, ConversionPreparer, FloorPolicy,
    RecalculationStrategy,
};
pub use error::{ErrorCategory, NavetteError, Result};
pub use events::{DomainEvent, EventPublisher};
pub use jobs::{JobRunner, JobState, RetryPolicy};
pub use models::{
    ItemStatus, NewServiceRequestItem, PrestationPackage, RequestSnapshot, ServiceRequest,
    ServiceRequestItem,
};
pub use observer::ItemLifecycleObserver;
pub use service::{AddedItems, FicheNavetteService};
pub use store::{InMemoryStore, Store, StoreTransaction};
