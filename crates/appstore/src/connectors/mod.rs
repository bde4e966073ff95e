//! Reference connectors shipped with the registry.

pub mod null;
pub mod null_oauth;
pub mod webhook;

pub use null::NullApplication;
pub use null_oauth::NullOAuthApplication;
pub use webhook::WebhookApplication;
