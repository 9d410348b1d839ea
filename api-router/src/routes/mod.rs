pub mod job;
pub mod probes;
