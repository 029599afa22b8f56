//! Client-side real-time state for one-to-one chat.

pub mod api;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod presence;
pub mod snapshot;
pub mod transport;
pub mod typing;
pub mod ws_transport;

pub use api::RestApi;
pub use config::{load_settings, Settings, DEFAULT_CONFIG_PATH};
pub use conversation::{Conversation, ConversationStore, SubscriptionState};
pub use engine::{EngineHandle, ReconciliationEngine, Session, UserAction};
pub use error::EngineError;
pub use presence::PresenceStore;
pub use snapshot::{ActiveConversationView, EngineSnapshot, EngineUpdate, MessageView, PeerView};
pub use transport::{Transport, TransportNotification};
pub use typing::TypingTracker;
pub use ws_transport::WsTransport;
