pub mod aggregate;
pub mod columns;
pub mod jobs;
pub mod normalize;
pub mod parser;
pub mod queue;
pub mod row_hash;
pub mod storage;
