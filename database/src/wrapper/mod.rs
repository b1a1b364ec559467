pub mod pg_dump;
pub mod pg_restore;
pub mod psql;

// Re-export for convenience
pub use pg_dump::{PgDump, PgDumpOptions};
pub use pg_restore::PgRestore;
pub use psql::Psql;
