pub mod ports;
pub mod startup;

pub use ports::{EventSearchPort, RecordStore, RemoteSession, SearchQuery, SearchWindow};
pub use startup::{Startup, StartupPhase};
