pub mod clickhouse;
pub mod flat;
pub mod postgres;
pub mod split;
pub mod sqlite;

pub use clickhouse::ClickHouseIndex;
pub use flat::FlatIndex;
pub use postgres::PgVectorStore;
pub use split::SplitStore;
pub use sqlite::SqliteStore;
