mod settings;

pub use settings::{AuthConfig, ServerConfig, Settings, StreamSettings, TelemetryConfig};
