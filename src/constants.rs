//! Shared constants: event names, defaults and queue identifiers.

/// Event names published on the [`EventPublisher`](crate::events::EventPublisher)
pub mod events {
    pub const PACKAGE_CONVERTED: &str = "fiche_navette.package_converted";
    pub const CONVERSION_CONFLICT: &str = "fiche_navette.conversion_conflict";
    pub const TOTAL_RECALCULATED: &str = "fiche_navette.total_recalculated";
    pub const JOB_DEAD_LETTERED: &str = "jobs.dead_lettered";
}

/// Defaults used when configuration leaves a value out
pub mod defaults {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BACKOFF_MS: [u64; 3] = [1_000, 5_000, 15_000];
    pub const WORKER_COUNT: usize = 4;
    pub const QUEUE_CAPACITY: usize = 1024;
    pub const FINISHED_JOB_RETENTION_SECONDS: u64 = 600;
    pub const MAX_CONVERSION_ROUNDS: u32 = 32;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1000;
    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;
    pub const DATABASE_ACQUIRE_TIMEOUT_SECONDS: u64 = 5;
}

/// Queue name carried in job envelopes and logs
pub const PACKAGE_CONVERSION_QUEUE: &str = "package_conversion";

/// Money is kept at this many decimal places
pub const MONEY_SCALE: u32 = 2;
