pub mod connection;
pub mod dead_letters;
pub mod findings;
pub mod images;
pub mod jobs;
pub mod records;
pub mod reports;
pub mod retention;
pub mod schema;
pub mod sequence;

pub use connection::Database;
pub use retention::{Expiry, PurgeReport};
