//! Installed-application lifecycle for third-party connectors.
//!
//! [`ApplicationManager`] is the entry point: it installs connectors per
//! user, validates and stores their settings (sealing secrets at rest),
//! drives basic and token authorization, and reconciles webhook
//! subscriptions with the remote provider.

pub mod application;
pub mod authorization;
pub mod connectors;
pub mod error;
pub mod form;
pub mod manager;
pub mod record;
pub mod registry;
pub mod secrets;
pub mod settings;
pub mod store;
pub mod transport;
pub mod webhooks;

pub use application::{
    Application, ApplicationDescriptor, ApplicationType, AuthorizationType, BasicAuthorization,
    Capabilities, RequestShaper, TokenAuthorization, WebhookCapable, WebhookSubscription,
};
pub use authorization::RedirectTarget;
pub use error::{AppStoreError, ErrorCode, Result};
pub use form::{Field, FieldType, FieldView, Form, FormSchema, FormView};
pub use manager::{
    ApplicationManager, InstalledApplication, InstalledApplicationDetail, ManagerOptions,
    UninstallReport, WebhookView,
};
pub use record::{ApplicationInstall, AuthorizationState, WebhookEntry};
pub use registry::{ApplicationRegistry, CatalogEntry};
pub use secrets::SecretCipher;
pub use settings::PasswordUpdate;
pub use store::{ApplicationInstallStore, InstallStore};
pub use transport::{HttpTransport, ReqwestTransport, RequestDto, ResponseDto, TransportError};
pub use webhooks::{SubscriptionOutcome, SubscriptionStatus, WebhookReport};
