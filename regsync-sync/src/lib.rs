//! # regsync-sync
//!
//! Checkout and update engines for registry working copies.
//!
//! [`CheckoutCommand`] materialises a registry collection on disk.
//! [`UpdateCommand`] later merges a fresh dump of the same collection into
//! that working copy, using the meta sidecars written by the checkout as the
//! common ancestor.

pub mod callback;
pub mod checkout;
pub mod error;
pub mod hasher;
pub mod location;
pub mod meta_store;
pub mod path_codec;
pub mod spool;
pub mod update;
pub mod working_copy;

pub use callback::{ConfirmContext, Message, UserInputCallback};
pub use checkout::{CheckoutCommand, CheckoutEngine, CheckoutSummary};
pub use error::{MessageCode, SyncError};
pub use location::RegistryLocation;
pub use meta_store::MetaRecord;
pub use update::{UpdateCommand, UpdateEngine, UpdateOptions, UpdateSummary};
