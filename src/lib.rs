//! Favorite comics — per-user favorites over a live document store.
//!
//! ARCHITECTURE
//! ============
//! The data source in [`services::favorites`] composes two collaborators:
//! an auth session signal ([`services::auth`]) and a per-user favorites
//! collection ([`store`]). Every read is a live stream that switches to the
//! latest signed-in user ([`signal`]); every write is a one-shot async call.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod services;
pub mod signal;
pub mod store;
