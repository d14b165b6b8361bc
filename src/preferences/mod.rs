//! Per-user channel enablement and quiet hours.

mod service;
mod store;
mod types;

pub use service::PreferenceService;
pub use store::{MemoryPreferenceStore, PostgresPreferenceStore, PreferenceStore};
pub use types::{
    default_matrix, ChannelOverride, ChannelPreferences, PreferenceRecord, QuietHours,
};
