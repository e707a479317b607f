pub mod commands;
pub mod config;
pub mod logging;
pub mod observer;
pub mod server;
pub mod transport;

pub use observer::TracingObserver;
pub use transport::ReqwestTransport;
