pub mod app_state;
pub mod lobby;
pub mod messages;
pub mod player;
pub mod session;

// Re-export important types
pub use app_state::*;
pub use lobby::*;
pub use messages::*;
pub use player::*;
pub use session::*;
