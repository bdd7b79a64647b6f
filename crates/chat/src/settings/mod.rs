/// Layered settings and their on-disk persistence.
pub mod state;

pub use state::{
    IdentitySettings, ProviderSettings, Settings, SettingsError, SettingsStore, StorageBackend,
    StorageSettings,
};
