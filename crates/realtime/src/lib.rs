//! Realtime client
//!
//! Subscribes to Postgres row changes over the Supabase Realtime
//! (Phoenix channels) websocket and delivers them as a stream per channel.

mod channel;
mod client;
mod error;
mod filters;
mod message;

pub use channel::{DatabaseChanges, Subscription};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use error::RealtimeError;
pub use filters::{DatabaseFilter, FilterOperator};
pub use message::{ChangeEvent, ChangeKind, ChannelEvent, RealtimeMessage};
