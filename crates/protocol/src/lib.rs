//! # SFiles Protocol Library
//!
//! Boundary payloads for the SFiles file manager engine.
//!
//! The engine is invoked through an internal operation API and answers with
//! either a success payload or a typed error. This crate holds the
//! serializable shapes of both, so the host application (an HTTP layer,
//! the `sfiles` CLI, a test harness) can render them without depending on
//! engine internals.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{Listing, Pagination};
//!
//! let listing = Listing {
//!     path: "reports".to_string(),
//!     directories: vec![],
//!     files: vec![],
//!     pagination: Pagination::new(1, 50, 0),
//!     error: None,
//! };
//!
//! let json = protocol::to_json(&listing).unwrap();
//! assert!(json.contains("\"total_pages\":1"));
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Entries, listings, mutation outcomes, error payloads
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    from_json, to_json, to_json_pretty, ArchiveInfo, Entry, EntryKind, ErrorCode, ErrorMessage,
    Listing, Pagination, RenameKind, RenameOutcome, UploadOutcome,
};
