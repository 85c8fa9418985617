//! Entity Module
//!
//! The single capability the data-access layer needs from a record type.

use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A storable record with a unique, ordered identifier.
///
/// Records are serializable so that stores can evaluate predicates against
/// them and the caching decorator can keep them as JSON.
pub trait Entity: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Unique identifier; its ordering drives keyset pagination
    type Id: Ord + Hash + Clone + Debug + Serialize + Send + Sync + 'static;

    /// Returns the identifier of this record.
    fn id(&self) -> &Self::Id;
}
