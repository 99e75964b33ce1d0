//! A reliable file-transfer service over UDP with two interchangeable
//! ARQ engines: stop-and-wait and selective-repeat.

pub mod client;
pub mod constants;
pub mod digest;
pub mod error;
pub mod frame;
pub mod net;
pub mod registry;
pub mod selective_repeat;
pub mod server;
pub mod session;
pub mod stop_and_wait;
