pub mod otel_exporter;
pub mod tracing;

pub use otel_exporter::*;
pub use self::tracing::*;
