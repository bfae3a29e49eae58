//! # LiveSync Store
//!
//! Record store contract consumed by the LiveSync engine.
//!
//! The engine never owns persistence. It talks to a host store through two
//! traits:
//!
//! - [`RecordStore`] - the validated API: business rules run, system fields
//!   are stamped and lifecycle events are raised
//! - [`DirectStore`] - low-level writes that bypass validation and events,
//!   used by the fast execution path
//!
//! Records are schema-described bags of [`Value`]s with optional child
//! tables ([`ChildRow`]). Stores report lifecycle transitions to any
//! subscribed [`RecordEventListener`].
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - thread-safe in-memory store for tests, tooling and
//!   embedding
//!
//! ## Example
//!
//! ```rust
//! use livesync_store::{FieldKind, MemoryStore, Record, RecordStore, Schema, Value};
//!
//! let store = MemoryStore::new();
//! store.register_schema(Schema::new("Note").field("title", FieldKind::Data));
//!
//! let mut note = Record::new("Note").with_field("title", "hello");
//! store.create(&mut note).unwrap();
//!
//! let saved = store.get("Note", note.name.as_deref().unwrap()).unwrap();
//! assert_eq!(saved.get("title"), Value::from("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod filter;
mod memory;
mod record;
mod schema;
mod store;
mod value;

pub use error::{StoreError, StoreResult};
pub use event::{EventKind, RecordEventListener};
pub use filter::{FieldCondition, Filter, Operator, Order, Query};
pub use memory::{MemoryStore, Validator};
pub use record::{is_standard_field, ChildRow, DocStatus, Record, RecordMeta, STANDARD_FIELDS};
pub use schema::{FieldDef, FieldKind, Schema};
pub use store::{DirectStore, RecordStore, RowUpdate};
pub use value::Value;
