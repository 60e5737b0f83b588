use std::path::PathBuf;

pub fn system_config_file() -> PathBuf {
    PathBuf::from("/etc/secure-auth/secure-auth.toml")
}

pub fn system_models_dir() -> PathBuf {
    PathBuf::from("/usr/share/secure-auth/models")
}

/// Resolves a model path from the config against the system models directory.
pub fn resolve_model_path(path: &std::path::Path) -> PathBuf {
    if path.is_relative() && !path.exists() {
        system_models_dir().join(path)
    } else {
        path.to_path_buf()
    }
}
