//! Client side of the courier chat service: a REST client, a gateway session
//! that keeps conversation views live, and the local models it maintains.

pub mod backoff;
pub mod client;
pub mod error;
pub mod inbox;
pub mod roster;
pub mod session;
pub mod view;

pub use client::ChatClient;
pub use error::ClientError;
pub use session::{ClientSession, SessionUpdate};
pub use view::ConversationView;
