use crate::error::HookError;

/// Framing decision returned by [`RelayHooks::on_packet_received`].
///
/// `Accept(n)` declares that the first `n` buffered bytes form one complete
/// forwardable unit. `Pending` means the unit is incomplete and the pump must
/// wait for more input. `Accept(0)` and `Accept(n)` beyond the buffered
/// length are treated as `Pending`: nothing is forwarded or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    Accept(usize),
    Pending,
}

/// The three-operation contract protocol-aware logic implements to observe,
/// reframe, and rewrite traffic flowing through a pump. Every operation has
/// a pass-through default, so implementors override only what they need.
pub trait RelayHooks: Send {
    /// Decide how many leading bytes of `buffer` form one complete unit.
    fn on_packet_received(&mut self, buffer: &[u8]) -> Result<Acceptance, HookError> {
        Ok(Acceptance::Accept(buffer.len()))
    }

    /// Rewrite a unit accepted from the source before it enters the send path.
    fn on_chunk_received(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>, HookError> {
        Ok(chunk)
    }

    /// Rewrite (or record) a unit immediately before it is written to the sink.
    fn on_chunk_send(&mut self, chunk: Vec<u8>) -> Result<Vec<u8>, HookError> {
        Ok(chunk)
    }
}

/// Hook set that forwards everything untouched.
#[derive(Debug, Default)]
pub struct PassthroughHooks;

impl RelayHooks for PassthroughHooks {}

#[cfg(test)]
mod tests {
    use super::{Acceptance, PassthroughHooks, RelayHooks};

    #[test]
    fn passthrough_accepts_whole_buffer() {
        let mut hooks = PassthroughHooks;
        let decision = hooks.on_packet_received(b"abcdef").unwrap();
        assert_eq!(decision, Acceptance::Accept(6));
    }

    #[test]
    fn passthrough_transforms_are_identity() {
        let mut hooks = PassthroughHooks;
        assert_eq!(hooks.on_chunk_received(b"abc".to_vec()).unwrap(), b"abc");
        assert_eq!(hooks.on_chunk_send(b"abc".to_vec()).unwrap(), b"abc");
    }
}
