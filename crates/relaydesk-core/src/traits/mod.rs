// SPDX-FileCopyrightText: 2026 Relaydesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits at the persistence seam.
//!
//! All adapters extend the [`Adapter`] base trait and use `#[async_trait]`
//! so they can be held as trait objects.

pub mod adapter;
pub mod store;

pub use adapter::Adapter;
pub use store::{PersistenceGateway, SessionStore};
