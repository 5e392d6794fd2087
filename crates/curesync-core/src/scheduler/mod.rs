//! Notification scheduling engine.
//!
//! Pipeline: Recurrence Rule → Trigger Compiler → Device Registration → Ledger
//!
//! The [`Orchestrator`] owns the pipeline. It keeps the device's alarm set
//! for each medication equal to what the medication's current rule compiles
//! to, using the [`ScheduleLedger`] as the only durable record of which
//! device identifiers are live.

mod compiler;
mod device;
mod ledger;
mod orchestrator;
mod permission;

pub use compiler::*;
pub use device::*;
pub use ledger::*;
pub use orchestrator::*;
pub use permission::*;

#[cfg(test)]
pub(crate) mod testing;
