use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelConfig {
    pub mqtt: Option<MqttConf>,
    /// Répertoire des manifests de types de modules
    pub manifests_dir: Option<String>,
    /// Snapshot JSON de l'état des modules (désactivé si absent)
    pub snapshot_path: Option<String>,
    pub http_port: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mqtt: Some(MqttConf { host: "localhost".into(), port: 1883 }),
            manifests_dir: Some("./manifests".into()),
            snapshot_path: Some("./data/modules.json".into()),
            http_port: Some(8080),
        }
    }
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("SERRA_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() { return KernelConfig::default(); }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            eprintln!("[kernel] config invalide: {e}");
            KernelConfig::default()
        })
    } else {
        eprintln!("[kernel] pas de kernel.yaml, usage config par défaut");
        KernelConfig::default()
    }
}
