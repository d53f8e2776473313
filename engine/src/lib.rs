//! # Cartsync Engine
//!
//! Deterministic conflict handling for cross-device cart synchronization.
//!
//! A shopper may hold the same cart open on a phone and a desktop at once.
//! Every sync request carries the device's full view of the cart; this crate
//! compares it with the last committed view, reports what disagrees, and
//! reduces both views into one authoritative snapshot.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never touches storage, network or clocks; callers
//!   pass the current time in
//! - **Deterministic**: the same inputs always produce the same outputs
//! - **Typed**: snapshots, conflicts and sync operations are explicit
//!   structures, conflicts are a sum type
//!
//! ## Core Concepts
//!
//! ### Snapshots
//!
//! A [`CartSnapshot`] is the full, ordered item list of a cart plus its
//! [`CartMetadata`] totals.
//!
//! ### Conflict detection
//!
//! [`detect_conflicts`] diffs the committed snapshot against an incoming one:
//! - [`Conflict::QuantityMismatch`] - a product present in both with
//!   different quantities
//! - [`Conflict::ItemRemoved`] - a product the incoming snapshot dropped
//!
//! Products only present in the incoming snapshot are additions, not
//! conflicts.
//!
//! ### Resolution
//!
//! A [`Resolver`] reduces a conflicting pair with a caller-selected
//! [`ResolutionStrategy`]:
//! - [`ResolutionStrategy::LastWriteWins`] - the incoming snapshot as-is
//! - [`ResolutionStrategy::MergeQuantities`] - conflicting quantities summed
//! - [`ResolutionStrategy::UserChoice`] - exactly the items the user picked
//!
//! ### Network profiles
//!
//! [`profile_for`] maps a device's connectivity class to transport tuning
//! (compression, batching, retries).
//!
//! ## Quick Start
//!
//! ```rust
//! use cartsync_engine::{
//!     detect_conflicts, CartItem, CartSnapshot, Conflict, ResolutionStrategy, Resolver,
//! };
//!
//! let current = CartSnapshot::from_items(vec![CartItem::new("A", 2, 1000)], 1000);
//! let incoming = CartSnapshot::from_items(vec![CartItem::new("A", 3, 2000)], 2000);
//!
//! let conflicts = detect_conflicts(&current, &incoming);
//! assert!(matches!(conflicts[0], Conflict::QuantityMismatch { .. }));
//!
//! let resolved = Resolver::new(ResolutionStrategy::MergeQuantities)
//!     .resolve(&current, &incoming, &conflicts, None, 3000)
//!     .unwrap();
//! assert_eq!(resolved.quantity_of("A"), Some(5));
//! ```

pub mod conflict;
pub mod error;
pub mod network;
pub mod operation;
pub mod resolve;
pub mod snapshot;

// Re-export main types at crate root
pub use conflict::{detect_conflicts, Conflict, ConflictKind};
pub use error::Error;
pub use network::{profile_for, BackoffStrategy, MobileProvider, NetworkProfile, NetworkType};
pub use operation::{NetworkInfo, SyncOperation, SyncPhase, SyncType};
pub use resolve::{ResolutionStrategy, Resolver};
pub use snapshot::{CartItem, CartMetadata, CartSnapshot, DEFAULT_CURRENCY};

/// Type aliases for clarity
pub type UserId = String;
pub type DeviceId = String;
pub type CartId = String;
pub type ProductId = String;
pub type SyncId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
