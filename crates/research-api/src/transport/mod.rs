pub mod sse;
pub mod ws;

pub use sse::{SSE_EVENT_NAME, SseSink, SseStream, render_frame, stream_response};
pub use ws::{WsSink, serve_socket};
