// Backend connection: one shared physical connection per process
//
// Every per-account table issues its statements through a single
// BackendConnection. The driver behind it is picked once from the resolved
// configuration; tables never branch on the backend kind.

pub mod connection;
pub mod observer;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use connection::{driver_for, BackendConnection, Driver, Row, Session, Value};
pub use observer::{NoopObserver, PrometheusObserver, QueryObserver};
