pub mod conf;
pub mod error;
pub mod executor;
pub mod memtier;
pub mod probe;
pub mod profile;
pub mod program;
pub mod supervisor;
