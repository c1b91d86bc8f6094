use std::path::PathBuf;

use crate::error::{EngineError, Result};

/// Get the platform-specific data directory for engine stores
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        // Try system location first, fall back to user location
        let system_path = PathBuf::from("/var/lib/coin-gate");
        if system_path.parent().map(|p| p.exists()).unwrap_or(false) {
            return Ok(system_path);
        }

        if let Some(data_dir) = directories::ProjectDirs::from("", "", "coin-gate") {
            return Ok(data_dir.data_local_dir().to_path_buf());
        }

        Err(EngineError::PermissionDenied(
            "could not determine data directory location".to_string(),
        ))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(PathBuf::from("/Library/Application Support/coin-gate"))
    }

    #[cfg(target_os = "windows")]
    {
        let mut path = PathBuf::from(
            std::env::var("ProgramData").unwrap_or_else(|_| "C:\\ProgramData".to_string()),
        );
        path.push("coin-gate");
        Ok(path)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(EngineError::PermissionDenied(
            "unsupported operating system".to_string(),
        ))
    }
}
