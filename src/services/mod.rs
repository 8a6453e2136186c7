//! Domain services built on top of the stores.
//!
//! ARCHITECTURE
//! ============
//! `auth` owns the live "who is signed in" signal, `session` turns Postgres
//! session tokens into sign-ins, and `favorites` composes the signal with a
//! `FavoriteStore` into the favorites data source.

pub mod auth;
pub mod favorites;
pub mod session;
