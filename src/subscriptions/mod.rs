//! Subscription reconciliation for bound components.
//!
//! This module keeps a component's live store listeners in line with what
//! its projection declares:
//! - [`diff`] compares two subscription mappings by key and path
//! - [`SubscriptionManager`] turns the resulting plan into store
//!   registrations and cancellations
//! - store callbacks land in a [`SubscriptionState`], guarded by a mounted
//!   flag so values arriving after unmount are dropped
//!
//! # Example
//!
//! ```ignore
//! let mut manager = SubscriptionManager::new(store);
//! manager.mount();
//! manager.subscribe(&previous)?;
//!
//! // Props changed
//! let plan = diff(&previous, &next);
//! manager.apply(&plan)?;
//!
//! // Component going away
//! manager.unmount();
//! ```

mod manager;
mod plan;
mod types;

pub use manager::SubscriptionManager;
pub use plan::{diff, SubscriptionPlan};
pub use types::{ChangeHook, Listener, SubscriptionState};
