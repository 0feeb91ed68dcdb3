pub mod protocol;
pub mod session;

pub use session::ws_handler;
