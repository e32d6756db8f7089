pub mod dataset;
pub mod job;
pub mod record;
