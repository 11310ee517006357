pub mod postgres_config_repository;

pub use postgres_config_repository::PostgresConfigRepository;
