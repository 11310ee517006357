pub mod sqlite_config_repository;

pub use sqlite_config_repository::SqliteConfigRepository;
