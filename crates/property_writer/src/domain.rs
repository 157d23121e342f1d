mod coercion;
mod schema_cache;
mod typed_property_writer;

pub use coercion::*;
pub use schema_cache::*;
pub use typed_property_writer::*;
