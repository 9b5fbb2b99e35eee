pub mod combine;
pub mod ensemble;
pub mod error;
pub mod reduce;
