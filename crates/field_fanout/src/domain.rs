mod field_fanout_transformer;

pub use field_fanout_transformer::*;
