//! Callchain core: call context, status codes, configuration and logger
//! interfaces, and the structural dump used for payload logging.

pub mod config;
pub mod context;
pub mod dump;
pub mod logging;
pub mod status;

pub use config::{keys, ConfigProvider, MapConfig, NullConfig};
pub use context::{CallContext, Metadata, MethodName};
pub use dump::{dump, dump_panic, dump_value, UNSERIALIZABLE};
pub use logging::{LogEntry, Logger, MemoryLogger, TracingLogger};
pub use status::{CallError, CallResult, Code};
