//! Trigger state storage - last-fire bookkeeping for time-based triggers.

use crate::define_simple_storage;

define_simple_storage! {
    /// Low-level trigger state storage with byte-level API
    pub struct TriggerStateStorage { table: "trigger_state" }
}
