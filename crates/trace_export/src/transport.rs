use crate::buffer::Payload;
use crate::error::TransportError;
use std::future::Future;
use std::pin::Pin;

/// Delivers encoded payloads to the collector.
///
/// A successful send returns the raw response body, which carries the
/// collector's sampling rate table. Any error means the whole payload is
/// lost; callers never retry.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// [`TransportBoxed`].
pub trait Transport: Send + Sync {
    /// Sends one payload, returning the response body.
    fn send(
        &self,
        payload: Payload,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`Transport`].
pub trait TransportBoxed: Send + Sync {
    fn send_boxed(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TransportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any Transport can be used as TransportBoxed
impl<T: Transport> TransportBoxed for T {
    fn send_boxed(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, TransportError>> + Send + '_>> {
        Box::pin(self.send(payload))
    }

    fn name(&self) -> &str {
        Transport::name(self)
    }
}

/// Accepts every payload and answers with an empty rate table.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for NullTransport {
    async fn send(&self, _payload: Payload) -> Result<Vec<u8>, TransportError> {
        Ok(br#"{"rate_by_service":{}}"#.to_vec())
    }

    fn name(&self) -> &str {
        "null"
    }
}
