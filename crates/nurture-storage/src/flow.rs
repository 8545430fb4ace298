//! Flow storage - byte-level API for flow definition persistence.

use crate::define_simple_storage;

define_simple_storage! {
    /// Low-level flow definition storage with byte-level API
    pub struct FlowStorage { table: "flows" }
}
