/**
 * MODULE REGISTRY - Manifests des types de modules
 *
 * RÔLE : Charge les manifests JSON (capteurs, hardware, actions, plages de
 * validation) depuis le dossier manifests/ au démarrage. Lecture seule
 * ensuite; injecté explicitement dans le validateur et le handler, jamais
 * un singleton ambiant.
 *
 * EXEMPLE DE MANIFEST :
 * ```json
 * {
 *   "id": "air-quality",
 *   "name": "Qualité d'air",
 *   "version": "1.0.0",
 *   "hardware": [{ "key": "dht22", "name": "DHT22", "type": "sensor",
 *                  "sensors": ["temperature", "humidity"] }],
 *   "sensors": [{ "key": "temperature", "label": "Température",
 *                 "unit": "°C", "range": { "min": -40, "max": 85 } }],
 *   "actions": []
 * }
 * ```
 */

use crate::topics::ValidationRange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

/// Manifest déclaratif d'un type de module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// "air-quality", "greenhouse", etc.
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub hardware: Vec<HardwareDef>,
    #[serde(default)]
    pub sensors: Vec<SensorDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
}

/// Composant hardware d'un module et les clés canoniques qu'il émet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareDef {
    /// "dht22", "sps30"
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Clés canoniques émises : ["temperature", "humidity"]
    pub sensors: Vec<String>,
}

/// Définition d'un capteur avec sa plage de validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorDef {
    /// "temperature"
    pub key: String,
    pub label: String,
    pub unit: String,
    pub range: ValidationRange,
}

/// Action exposée par un type de module (reset, calibrate...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    pub id: String,
    pub label: String,
    pub icon: String,
    pub scope: String,
}

/// Registre des manifests, chargé une fois au démarrage puis immuable
#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    manifests: HashMap<String, ModuleManifest>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construit un registre depuis des manifests en mémoire (tests)
    pub fn from_manifests(manifests: Vec<ModuleManifest>) -> Self {
        Self {
            manifests: manifests.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Charge tous les manifests *.json du dossier donné
    pub async fn load_from_dir<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<ModuleManifest>(&content) {
                    Ok(manifest) => {
                        println!("[registry] loaded manifest: {}", manifest.id);
                        registry.manifests.insert(manifest.id.clone(), manifest);
                    }
                    Err(e) => eprintln!("[registry] invalid manifest in {:?}: {}", path, e),
                },
                Err(e) => eprintln!("[registry] failed to read {:?}: {}", path, e),
            }
        }

        Ok(registry)
    }

    pub fn get_manifest(&self, module_type: &str) -> Option<&ModuleManifest> {
        self.manifests.get(module_type)
    }

    pub fn module_types(&self) -> Vec<String> {
        self.manifests.keys().cloned().collect()
    }

    /// Définition d'un capteur par clé canonique (cherche dans tous les
    /// manifests, premier trouvé)
    pub fn get_sensor_def(&self, sensor_type: &str) -> Option<&SensorDef> {
        self.manifests
            .values()
            .flat_map(|m| m.sensors.iter())
            .find(|s| s.key == sensor_type)
    }

    /// Plage de validation d'un type canonique, None si inconnu
    pub fn get_validation_range(&self, sensor_type: &str) -> Option<ValidationRange> {
        self.get_sensor_def(sensor_type).map(|s| s.range)
    }

    /// Développe un changement de config au niveau hardware en clés
    /// composites par capteur : ("scd41", 120) -> [("scd41:co2", 120), ...].
    /// Vide si le type de module ou le hardware est inconnu du manifest.
    pub fn expand_hardware_config(
        &self,
        module_type: &str,
        hardware_key: &str,
        interval: u32,
    ) -> Vec<(String, u32)> {
        let Some(manifest) = self.manifests.get(module_type) else {
            return Vec::new();
        };
        let Some(hw) = manifest.hardware.iter().find(|h| h.key == hardware_key) else {
            return Vec::new();
        };

        hw.sensors
            .iter()
            .map(|sensor| (format!("{hardware_key}:{sensor}"), interval))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> ModuleRegistry {
        let manifest: ModuleManifest = serde_json::from_value(serde_json::json!({
            "id": "air-quality",
            "name": "Qualité d'air",
            "version": "1.0.0",
            "hardware": [
                { "key": "dht22", "name": "DHT22", "type": "sensor",
                  "sensors": ["temperature", "humidity"] },
                { "key": "scd41", "name": "SCD41", "type": "sensor",
                  "sensors": ["co2", "temperature"] }
            ],
            "sensors": [
                { "key": "temperature", "label": "Température", "unit": "°C",
                  "range": { "min": -40.0, "max": 85.0 } },
                { "key": "humidity", "label": "Humidité", "unit": "%",
                  "range": { "min": 0.0, "max": 100.0 } },
                { "key": "co2", "label": "CO2", "unit": "ppm",
                  "range": { "min": 0.0, "max": 5000.0 } }
            ],
            "actions": []
        }))
        .unwrap();
        ModuleRegistry::from_manifests(vec![manifest])
    }

    #[test]
    fn test_validation_range_lookup() {
        let reg = test_registry();
        let range = reg.get_validation_range("temperature").unwrap();
        assert_eq!(range.min, -40.0);
        assert_eq!(range.max, 85.0);
        assert!(reg.get_validation_range("unknown").is_none());
    }

    #[test]
    fn test_expand_hardware_config() {
        let reg = test_registry();
        let expanded = reg.expand_hardware_config("air-quality", "scd41", 120);
        assert_eq!(
            expanded,
            vec![("scd41:co2".to_string(), 120), ("scd41:temperature".to_string(), 120)]
        );
        assert!(reg.expand_hardware_config("air-quality", "nope", 120).is_empty());
        assert!(reg.expand_hardware_config("lighting", "scd41", 120).is_empty());
    }
}
