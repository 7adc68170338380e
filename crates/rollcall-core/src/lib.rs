pub mod clock;
pub mod errors;
pub mod event;
pub mod ids;
pub mod messenger;
pub mod testing;
pub mod validate;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{DeliveryError, ValidationError};
pub use event::{EditableField, Event, FieldValue, NewEvent};
pub use ids::{ActorId, EventId};
pub use messenger::Messenger;
