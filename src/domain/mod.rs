//! Domain models - stored records and the typed events derived from them
//!
//! - `EventRecord` - an MQTT publish as persisted by the ingestor
//! - `StateEvent` - a validated (label, timestamp) pair for the reconstructors
//! - `Reading` - a validated numeric sample
//! - `Window` - the time range a run or query covers

pub mod record;
pub mod types;

pub use record::EventRecord;
pub use types::{DecodeError, Reading, StateEvent, Window};
