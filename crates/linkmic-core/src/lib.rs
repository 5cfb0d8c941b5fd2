//! Link-mic core for live rooms.
//!
//! Keeps the local model of a live room (seats, guests, PK battle) in step
//! with the interaction server and tells the UI what changed. Transport and
//! media are traits supplied by the host app.

pub mod chat;
pub mod controls;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod intents;
mod interact;
pub mod invites;
pub mod logging;
pub mod participants;
mod pk;
pub mod protocol;
pub(crate) mod push;
pub mod seats;
pub mod session;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

pub use controls::{MediaEngine, NoopMediaEngine};
pub use coordinator::{CoordinatorConfig, InteractionCoordinator};
pub use errors::{BusinessCode, LinkMicError, ValidationError};
pub use events::{LinkMicEvent, LinkMicEventListener, Subscription};
pub use protocol::{Command, SeatAction, TransportEvent};
pub use session::{SessionPhase, SessionView};
pub use settings::{Settings, SettingsStore};
pub use transport::{ClientIdentity, Transport, TransportGateway};
