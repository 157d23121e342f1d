pub mod domain;
pub mod nats;
mod property_writer;

pub use property_writer::*;
