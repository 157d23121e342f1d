mod description_fetcher;
mod ditto_client;

pub use description_fetcher::*;
pub use ditto_client::*;
