mod property_write_service;

pub use property_write_service::*;
