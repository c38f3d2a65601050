use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Daemon configuration; the embedding binary decides where it comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wireless interface to run P2P on.
    pub interface: String,
    /// Supplicant binary, resolved via PATH unless absolute.
    pub wpa_binary: PathBuf,
    /// Directory the supplicant puts per-interface control sockets in.
    pub wpa_ctrl_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "wlan0".to_owned(),
            wpa_binary: PathBuf::from("wpa_supplicant"),
            wpa_ctrl_dir: PathBuf::from("/run/wpa_supplicant"),
        }
    }
}
