pub mod handler;

pub use handler::{lobby_socket, session_socket};
