mod consume;
mod messages;
mod publish;

pub use consume::*;
pub use messages::*;
pub use publish::*;
