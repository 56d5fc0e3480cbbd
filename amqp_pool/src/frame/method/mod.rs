mod basic;
mod channel;
mod confirm;
mod exchange;
mod queue;
mod tx;

pub use basic::*;
pub use channel::*;
pub use confirm::*;
pub use exchange::*;
pub use queue::*;
pub use tx::*;
