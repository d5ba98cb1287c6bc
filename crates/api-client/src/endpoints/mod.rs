//! Endpoint-specific API implementations
//!
//! Each module provides a typed interface for a set of platform endpoints.
//!
//! | Module | Endpoints | Description |
//! |--------|-----------|-------------|
//! | `services` | `{locator}/execute`, `{locator}/upload` | Execution and compilation |
//! | `impex` | `api/v4/export`, `api/v4/import` | Service packages |
//! | `history` | `{locator}/download/{format}` | Execution log extraction |

pub mod history;
pub mod impex;
pub mod services;

pub use history::{HistoryApi, HistoryOptions, LogDownload, LogFormat};
pub use impex::{Export, ExportFilters, ImpexApi, ImportDestination, ImportOptions};
pub use services::{Compilation, CompileOptions, ExecuteOptions, ExecuteResponse, ServicesApi};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version bump applied when a service is updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpgradeType {
    /// x.0.0
    Major,
    /// 0.x.0
    #[default]
    Minor,
    /// 0.0.x
    Patch,
}

impl UpgradeType {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Patch => "patch",
        }
    }
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
}
