pub mod manager;
pub mod mapping;
pub mod postgres;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use mapping::MappingHelpers;
pub use postgres::PostgresConfigRepository;
pub use sqlite::SqliteConfigRepository;
