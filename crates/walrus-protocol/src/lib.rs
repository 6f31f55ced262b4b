pub mod codec;
pub mod engine;
pub mod error;
pub mod line;
pub mod session;

pub use codec::FramingCodec;
pub use engine::{Framer, FramingEngine};
pub use error::{ProtocolError, Result};
pub use line::{Charset, LineFramer, LineSession};
pub use session::{BoxedChannel, SerialChannel, SerialSession, SessionCloseHandle};
