//! Stdio transport: inbound line framing and the serialised response writer.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing of
//!   the request stream.
//! - `writer`: the single task that owns the output stream.

pub mod codec;
pub mod writer;

pub use codec::{Frame, LineCodec};
pub use writer::{spawn_writer, ResponseSink};
