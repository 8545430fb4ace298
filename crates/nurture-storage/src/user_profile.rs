//! User profile storage - byte-level API for the user directory.

use crate::define_simple_storage;

define_simple_storage! {
    /// Low-level user profile storage with byte-level API
    pub struct UserProfileStorage { table: "user_profiles" }
}
