pub mod observer;
pub mod time;
pub mod transport;

pub use observer::ValidationObserver;
pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};
pub use transport::ProxyTransport;
