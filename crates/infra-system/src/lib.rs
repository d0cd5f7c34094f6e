// Quarry Infrastructure - System Adapters
// Implements: ProcessProbe

pub mod process_probe_impl;

pub use process_probe_impl::SystemProcessProbe;
