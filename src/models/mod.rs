//! Data model shared by the managers
//!
//! Entity records as the remote service returns them, plus the request
//! bodies the core sends.

pub mod community;
pub mod member;
pub mod notification;
pub mod profile;
pub mod requests;

// Re-export commonly used types
pub use community::{Category, Channel, CommunityAggregate, Placement, ReorderKind, Scope};
pub use member::Member;
pub use notification::{Notification, PlatformAlert};
pub use profile::{PrimaryNameRecord, Profile, ProfileRecord};
pub use requests::{BulkProfilesRequest, MarkReadRequest, ReorderRequest};
