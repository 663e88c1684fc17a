//! Call handlers for the fake server.
//!
//! Each module handles one family of transport calls: session setup and
//! teardown, ROP execution, and the asynchronous notification calls.

mod execute;
mod notify;
mod session;

pub use execute::handle_execute;
pub use notify::{handle_async_connect, handle_async_wait, handle_register_push};
pub use session::{handle_connect, handle_disconnect};
