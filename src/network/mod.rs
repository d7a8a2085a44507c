//! Network Layer: connection dan event loop
//!
//! Menggunakan mio untuk non-blocking I/O di atas unix socket.
//!
//! Fitur:
//! - Reply routing per serial untuk call sinkron
//! - Inbox FIFO per connection untuk signal dan method call
//! - Event loop kooperatif dengan quit/deadline

mod connection;
mod event_loop;

pub use connection::{CallHandler, Connection, SignalMatcher, SubscriptionId, WeakConnection};
pub use event_loop::{EventLoop, LoopHandle};
