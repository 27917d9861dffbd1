//! coinflow: ticker cascade, conversion routing and asset rotation.
//!
//! - `pipeline` - aggregation stages (15s → 1min → 30min → 1h → 1d), screening, orchestration
//! - `conversion` - asset-pair graph, routing and quantity formatting
//! - `exchange` - exchange collaborator trait, public REST client, paper exchange
//! - `execution` - blacklist and the rotation state machine
//! - `bus` - in-process message bus for screened updates

pub mod bus;
pub mod conversion;
pub mod exchange;
pub mod execution;
pub mod pipeline;
pub mod sqlite_pragma;
