//! UDP transport: the listening socket and the response transmitter that
//! shares it

pub mod udp;

pub use udp::{Transmitter, UdpListener};
