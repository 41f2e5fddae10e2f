pub mod eventful;

pub use eventful::EventfulClient;
