pub mod protocol;
pub mod transport;

pub use protocol::Message;
pub use transport::Transport;
