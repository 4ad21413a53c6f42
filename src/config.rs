use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

fn default_server_url() -> String {
    "http://127.0.0.1:8700".to_string()
}

fn default_workspace() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            workspace: default_workspace(),
        }
    }
}

impl Config {
    pub fn load() -> Option<Self> {
        let path = Self::config_path()?;
        let contents = fs::read_to_string(&path).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn save(&self) -> Option<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        let contents = serde_json::to_string_pretty(self).ok()?;
        fs::write(&path, &contents).ok()
    }

    fn config_path() -> Option<PathBuf> {
        let dirs = ProjectDirs::from("", "", "tether")?;
        Some(dirs.config_dir().join("config.json"))
    }
}
