//! Default values and functions for configuration

// Default constants
pub(crate) const DEFAULT_PROVIDER: &str = "mongodb";
pub(crate) const DEFAULT_URI: &str = "mongodb://localhost:27017";
pub(crate) const DEFAULT_DATABASE: &str = "doccontrol_test";
pub(crate) const DEFAULT_COLLECTION: &str = "testcollection";
pub(crate) const DEFAULT_FAIL_POINT: &str = "rsSyncApplyStop";

pub(crate) const VALID_PROVIDERS: &[&str] = &["mongodb", "mock"];

pub(crate) fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

pub(crate) fn default_uri() -> String {
    DEFAULT_URI.to_string()
}

pub(crate) fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

pub(crate) fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

pub(crate) fn default_timeout_ms() -> u64 {
    30_000
}

pub(crate) fn default_fail_point() -> String {
    DEFAULT_FAIL_POINT.to_string()
}

pub(crate) fn default_list_batch_size() -> u32 {
    100
}
