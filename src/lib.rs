//! Cross-context SCM state synchronization.
//!
//! A source-control provider running in one execution context publishes a
//! live model (source controls, resource groups, changed-file resources and
//! an editable commit input) to a second context that renders it. The two
//! sides share no memory; numeric handles stand in for object references and
//! every update crosses an asynchronous byte channel as a diff against the
//! last transmitted snapshot.
//!
//! - [`provider`]: authoritative model with a builder-style declaration API
//!   and a coalescing batch scheduler.
//! - [`mirror`]: passive reconstruction plus the user-action round trips.
//! - [`diff`] and [`model::order`]: the sorted-snapshot differ and the total
//!   order both sides agree on.
//! - [`protocol`] and [`transport`]: wire frames and the duplex channel.

pub mod diff;
pub mod handle;
pub mod mirror;
pub mod model;
pub mod protocol;
pub mod provider;
pub mod transport;
