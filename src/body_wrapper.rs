//! Body capture utilities.
//!
//! This module provides [`CaptureBody`], a body decorator that records every
//! data chunk flowing through it while passing each frame on unchanged.
//! When the wrapped body finishes it hands the concatenated chunks to a
//! completion hook, exactly once.

use axum::body::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tracing::error;

/// Error type for body capture operations
#[derive(Debug, thiserror::Error)]
pub enum BodyCaptureError {
    #[error("Body stream error: {0}")]
    StreamError(String),
    #[error("Body dropped before end of stream")]
    Aborted,
}

type OnComplete = Box<dyn FnOnce(Result<Bytes, BodyCaptureError>) + Send>;

/// Wraps an HTTP body, capturing its data chunks as they are polled.
///
/// The completion hook runs once the body has been fully written:
/// - when the inner body yields its last frame (it then reports
///   [`Body::is_end_stream`]), before that frame is passed on,
/// - when the inner body signals end of stream,
/// - or when the wrapper is dropped while the inner body is already at its end
///   (an empty body the server never polls).
///
/// If the inner body fails, or the wrapper is dropped mid-stream, the hook
/// receives an error instead. A body marked with
/// [`complete_on_drop`](CaptureBody::complete_on_drop) completes normally
/// when dropped, with whatever chunks were seen. Frames, size hints and trailers are forwarded
/// untouched, so the peer sees exactly what the inner body produced.
///
/// # Examples
///
/// ```rust
/// use reqtap::body_wrapper::CaptureBody;
/// use axum::body::Body;
/// use http_body_util::BodyExt;
/// use std::sync::{Arc, Mutex};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let captured = Arc::new(Mutex::new(None));
/// let slot = captured.clone();
/// let body = CaptureBody::new(Body::from("Hello, World!"), move |result| {
///     *slot.lock().unwrap() = result.ok();
/// });
///
/// let forwarded = Body::new(body).collect().await?.to_bytes();
/// assert_eq!(forwarded, "Hello, World!");
/// assert_eq!(captured.lock().unwrap().as_deref(), Some(&b"Hello, World!"[..]));
/// # Ok(())
/// # }
/// ```
pub struct CaptureBody<B: Body> {
    inner: B,
    chunks: Vec<Bytes>,
    buffer: bool,
    complete_on_drop: bool,
    on_complete: Option<OnComplete>,
}

impl<B: Body> CaptureBody<B> {
    pub fn new<F>(inner: B, on_complete: F) -> Self
    where
        F: FnOnce(Result<Bytes, BodyCaptureError>) + Send + 'static,
    {
        Self {
            inner,
            chunks: Vec::new(),
            buffer: true,
            complete_on_drop: false,
            on_complete: Some(Box::new(on_complete)),
        }
    }

    /// Still signal completion, but do not keep chunks; the hook receives an
    /// empty buffer.
    pub fn discard_chunks(mut self) -> Self {
        self.buffer = false;
        self
    }

    /// Report a drop before end of stream as completion instead of
    /// [`BodyCaptureError::Aborted`].
    ///
    /// Used for responses that never carry a body on the wire (`HEAD`,
    /// `1xx`, `204`, `304`): the router or the server discards those bodies
    /// without polling them.
    pub fn complete_on_drop(mut self) -> Self {
        self.complete_on_drop = true;
        self
    }

    /// Whether the completion hook has already run.
    pub fn is_complete(&self) -> bool {
        self.on_complete.is_none()
    }

    fn finish(&mut self, result: Result<(), BodyCaptureError>) {
        if let Some(on_complete) = self.on_complete.take() {
            let chunks = std::mem::take(&mut self.chunks);
            on_complete(result.map(|()| concat_chunks(chunks)));
        }
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: std::fmt::Display,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if this.buffer {
                    if let Some(chunk) = frame.data_ref() {
                        this.chunks.push(chunk.clone());
                    }
                }
                if this.inner.is_end_stream() {
                    this.finish(Ok(()));
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!(error = %e, "Stream error during body capture");
                this.finish(Err(BodyCaptureError::StreamError(e.to_string())));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish(Ok(()));
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: Body> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        if self.complete_on_drop || self.inner.is_end_stream() {
            self.finish(Ok(()));
        } else {
            self.finish(Err(BodyCaptureError::Aborted));
        }
    }
}

fn concat_chunks(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => chunks.concat().into(),
    }
}
