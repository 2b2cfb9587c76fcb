pub mod codec;
pub mod handshake;
pub mod session;
