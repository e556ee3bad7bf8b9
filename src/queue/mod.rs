//! Lock-free bounded queues of 32-bit chunk indices
//!
//! The delivery path between publisher and subscriber transports chunk
//! tokens, never pointers. [`IndexQueue`] is the fixed-capacity multi-
//! producer/multi-consumer primitive; [`ResizableIndexQueue`] adds a logical
//! capacity that can change at runtime while the queue carries elements.

pub mod index_queue;
pub mod resizable;

pub use index_queue::IndexQueue;
pub use resizable::ResizableIndexQueue;
