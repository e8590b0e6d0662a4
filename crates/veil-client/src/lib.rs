//! veil-client: publish and poll topics without revealing which
//!
//! A [`Topic`] is a publishing capability: a shared secret plus a
//! signing key. Its subscriber half, a [`Handle`], can locate and
//! decrypt the topic's items but not produce them. The [`Client`] runs
//! three paced loops that make a busy participant indistinguishable
//! from an idle one: every write tick emits exactly one item (real or
//! cover), every read tick exactly one PIR request pair element, and an
//! update loop keeps the interest filter fresh to prioritise polling.

mod client;
mod error;
mod handle;
mod keys;
pub mod messages;
mod topic;

pub use client::Client;
pub use error::ClientError;
pub use handle::Handle;
pub use messages::MSG_MAX_FRAGMENTS;
pub use topic::{Topic, PUBLISHING_OVERHEAD};

pub type Result<T> = std::result::Result<T, ClientError>;
