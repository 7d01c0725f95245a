//! Engine configuration.

mod settings;

pub use settings::{
    ComputationKind, ComputationSettings, QuerySettings, ServiceSettings, Settings, SettingsError,
};
