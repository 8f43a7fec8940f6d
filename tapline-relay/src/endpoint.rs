use tokio::io::{AsyncRead, AsyncWrite};

/// Readable end of a pump. Reads must be cancel-safe; every tokio stream
/// type qualifies. Dropping the source closes it.
pub type SourceStream = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of a pump. Closed by `shutdown()` followed by drop.
pub type SinkStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Endpoints handed back by a pump that exited with `close_on_stop` unset,
/// so ownership of the underlying sockets can transfer elsewhere (for
/// example across a protocol upgrade).
pub struct EndpointPair {
    pub source: Option<SourceStream>,
    pub sink: Option<SinkStream>,
}

impl std::fmt::Debug for EndpointPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPair")
            .field("source", &self.source.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
