pub mod connection;
pub mod remote_store;

pub use connection::ConnectionManager;
pub use remote_store::RemoteStore;
