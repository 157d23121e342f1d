mod data_type;
mod description_resolver;
mod endpoint;
mod mapping;
mod message;
mod metadata;
mod pipeline;
mod result;
mod thing;
mod twin;

pub use data_type::*;
pub use description_resolver::*;
pub use endpoint::*;
pub use mapping::*;
pub use message::*;
pub use metadata::*;
pub use pipeline::*;
pub use result::*;
pub use thing::*;
pub use twin::*;
