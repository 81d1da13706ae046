//! This crate provides a way to synchronize contacts with a CardDAV server.
//!
//! It provides a CardDAV client in the [`client`] module, that can be used as a stand-alone module.
//!
//! The local side (how contacts are stored, where photos live) belongs to the embedding application,
//! behind the [`ContactStore`](traits::ContactStore) and [`PhotoStore`](traits::PhotoStore) traits. \
//! A [`SyncEngine`](sync::SyncEngine) ties one local store to one server account. \
//! It converts between vCards and contact records, detects what changed on which side since the last
//! pass, and never destroys data on its own: ambiguous cases become conflicts or pending imports,
//! left for the application to settle.

pub mod traits;

pub mod contact;
pub use contact::Contact;
pub mod connection;
pub use connection::Connection;
pub mod mapping;
pub mod sync;
pub use sync::SyncEngine;

pub mod vcard;
pub mod hash;

pub mod client;
pub use client::Client;
pub mod addressbook;
pub mod resource;
pub mod error;
pub mod retry;

pub mod store;
pub mod mock_behaviour;

pub mod settings;
pub mod utils;
