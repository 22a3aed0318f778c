pub mod consumer;
pub mod kafka;
pub mod mock;
pub mod redis;
pub mod socket;
pub mod supervisor;
pub mod transport;

pub use consumer::{ConsumerState, StreamConsumer};
pub use supervisor::Supervisor;
pub use transport::{
    DefaultTransportFactory, RawItem, StreamTransport, TransportError, TransportFactory,
};
