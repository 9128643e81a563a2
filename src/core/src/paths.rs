use std::path::PathBuf;

use directories::BaseDirs;

fn env_home_dir() -> Option<PathBuf> {
    for key in ["HOME", "USERPROFILE"] {
        if let Some(home) = std::env::var_os(key) {
            if !home.is_empty() {
                return Some(PathBuf::from(home));
            }
        }
    }
    None
}

pub fn user_home_dir() -> Option<PathBuf> {
    if let Some(base) = BaseDirs::new() {
        return Some(base.home_dir().to_path_buf());
    }
    env_home_dir()
}

/// `$QUILL_HOME`, or `~/.quill`. Created on first use.
pub fn quill_home_dir() -> Result<PathBuf, String> {
    if let Some(override_dir) = std::env::var_os("QUILL_HOME") {
        let path = PathBuf::from(override_dir);
        if path.is_relative() {
            return Err("QUILL_HOME must be an absolute path".to_string());
        }
        std::fs::create_dir_all(&path)
            .map_err(|e| format!("failed to create QUILL_HOME directory: {e}"))?;
        return Ok(path);
    }

    let home = user_home_dir().ok_or_else(|| {
        "failed to resolve user home; set QUILL_HOME or HOME/USERPROFILE".to_string()
    })?;
    let dir = home.join(".quill");
    std::fs::create_dir_all(&dir).map_err(|e| format!("failed to create ~/.quill: {e}"))?;
    Ok(dir)
}

pub fn quill_config_path() -> Result<PathBuf, String> {
    Ok(quill_home_dir()?.join("config.toml"))
}
