pub use supervision_signal_tokio_transport::{
    TokioWebSocketTransportFactory, Transport, TransportEvent, TransportFactory, redact_token,
};
