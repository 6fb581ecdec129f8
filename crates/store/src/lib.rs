pub mod connection;
pub mod migrations;
pub mod requests;

pub use connection::{connect_with_settings, DbPool};
pub use requests::SqlRequestStore;
