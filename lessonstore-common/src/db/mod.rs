//! Store access: initialisation, introspection, migrations and row models

pub mod init;
pub mod migrator;
pub mod models;
pub mod schema_sync;
pub mod table_schemas;

pub use init::*;
pub use migrator::*;
pub use models::*;
pub use schema_sync::*;
pub use table_schemas::*;
