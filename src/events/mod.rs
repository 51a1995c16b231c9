pub mod payloads;
pub mod publisher;

// Re-export key types for convenience
pub use payloads::{
    ConversionConflictPayload, DomainEvent, JobDeadLetteredPayload, PackageConvertedPayload,
    TotalChangeReason, TotalRecalculatedPayload,
};
pub use publisher::{EventPublisher, PublishError, PublishedEvent};
