//! Channel pool and task scheduler for AMQP 0-9-1 clients.
//!
//! Channels are multiplexed over one [`Connection`](connection::Connection)
//! and leased from a bounded [`ChannelPool`](pool::ChannelPool). A
//! [`TaskPool`](pool::TaskPool) runs user tasks on leased channels with
//! bounded concurrency, and the [`Client`](client::Client) ties both to the
//! connection lifecycle. Publishes settle according to an
//! [`AckStrategy`](channel::AckStrategy).
//!
//! The wire protocol is out of this crate: a [`Transport`](net::Transport)
//! sends typed [`frame::Method`]s and feeds decoded broker methods back.
//!
//! This library is based on async tokio runtime.
pub mod frame;
pub mod net;
pub mod pool;
mod api;

// public API
pub use api::*;
pub use frame::BasicProperties;
pub use frame::Deliver;
pub use frame::FieldTable;
pub use frame::FieldValue;
pub use frame::GetOk;
pub use frame::Return;

#[cfg(test)]
mod test_utils;
