pub mod database;
pub mod error;
pub mod events;
pub mod registrations;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use events::EventRepo;
pub use registrations::{Participant, RegisterOutcome, RegistrationLedger};
