pub mod consumer;
pub mod framer;
pub mod lanes;
pub mod noop;
pub mod ports;
pub mod progressive;
pub mod sse;
pub mod transport;
pub mod wire;
