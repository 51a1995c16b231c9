//! The configuration files shipped in `config/` load and validate.

use std::path::PathBuf;

use navette_core::config::ConfigManager;
use navette_core::conversion::{FloorPolicy, RecalculationStrategy};

fn shipped_config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config")
}

#[test]
fn test_base_configuration_matches_defaults() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "development")
            .unwrap();
    let config = manager.config();

    assert_eq!(manager.environment(), "development");
    assert_eq!(config.jobs.max_attempts, 3);
    assert_eq!(config.jobs.backoff_ms, vec![1_000, 5_000, 15_000]);
    assert_eq!(config.jobs.worker_count, 4);
    assert_eq!(config.conversion.floor_policy, FloorPolicy::Clamp);
    assert_eq!(config.conversion.recalculation, RecalculationStrategy::Resum);
    assert_eq!(config.events.channel_capacity, 1000);
}

#[test]
fn test_environment_files_override_the_base() {
    let test = ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test")
        .unwrap();
    assert_eq!(test.config().jobs.backoff_ms, vec![5, 10, 20]);
    assert_eq!(test.config().jobs.worker_count, 2);
    assert_eq!(test.config().jobs.max_attempts, 3);

    let production =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "production")
            .unwrap();
    assert_eq!(production.config().jobs.worker_count, 8);
    assert_eq!(production.config().database.max_connections, 25);
}

#[test]
fn test_debug_config_is_serializable() {
    let manager =
        ConfigManager::load_from_directory_with_env(Some(shipped_config_dir()), "test").unwrap();
    let rendered = manager.debug_config();
    assert_eq!(rendered["jobs"]["max_attempts"], 3);
    assert_eq!(rendered["conversion"]["floor_policy"], "clamp");
}
