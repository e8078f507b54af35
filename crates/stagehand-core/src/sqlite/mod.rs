mod check_store;
mod instance_store;
mod pipeline_store;
pub mod migrations;
pub mod store;

pub use migrations::{SqliteMigration, current_schema_version, migration, migrations};
pub use store::SqliteStore;
