/**
 * MODELS - Types du domaine télémétrie (mesures, statuts, configs)
 *
 * RÔLE : Types alignés avec le format wire MQTT des modules (camelCase)
 * et avec les lignes du store. Le payload de statut entrant est une somme
 * taguée (System, SystemConfig, SensorsStatus, SensorsConfig, Hardware)
 * décodée d'après la catégorie du topic, jamais du JSON non typé.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Mesure horodatée telle que poussée dans le buffer d'ingestion.
/// La clé naturelle est le 4-uplet (time, module_id, sensor_type, hardware_id).
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMeasurement {
    pub time: OffsetDateTime,
    pub module_id: String,
    /// Type canonique : temperature, humidity, co2, etc.
    pub sensor_type: String,
    /// Hardware source : dht22, bmp280, sht40, etc.
    pub hardware_id: String,
    pub value: f64,
}

/// Données système temps réel (topic {module}/system)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemData {
    pub rssi: Option<i32>,
    pub memory: Option<MemoryData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryData {
    pub heap_free_kb: Option<i64>,
    pub heap_min_free_kb: Option<i64>,
}

/// L'uptime arrive soit en secondes numériques soit en chaîne selon la
/// génération de firmware.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UptimeStart {
    Seconds(i64),
    Text(String),
}

impl UptimeStart {
    /// Secondes depuis le boot, None si la valeur est invalide ou négative.
    pub fn as_seconds(&self) -> Option<i64> {
        let secs = match self {
            UptimeStart::Seconds(s) => Some(*s),
            UptimeStart::Text(t) => t.trim().parse::<i64>().ok(),
        };
        secs.filter(|s| *s >= 0)
    }
}

/// Configuration système (topic {module}/system/config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfigData {
    pub ip: Option<String>,
    pub mac: Option<String>,
    /// Type de module, ex. "air-quality-bench"
    pub module_type: Option<String>,
    pub uptime_start: Option<UptimeStart>,
    pub rssi: Option<i32>,
    pub flash: Option<FlashData>,
    pub memory: Option<MemoryConfigData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashData {
    /// Taille totale de la flash
    pub total_kb: Option<i64>,
    pub used_kb: Option<i64>,
    pub free_kb: Option<i64>,
    /// Champ legacy des anciens firmwares
    pub system_kb: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryConfigData {
    pub heap_total_kb: Option<i64>,
    pub heap_free_kb: Option<i64>,
    pub heap_min_free_kb: Option<i64>,
}

/// Un capteur dans un payload sensors/status : {"status": "ok", "value": 22.5}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    pub status: String,
    pub value: Option<f64>,
}

/// Payload sensors/status : clé capteur (nue ou composite hw:type) -> lecture
pub type SensorsStatusData = HashMap<String, SensorReading>;

/// Un capteur dans un payload sensors/config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorConfigEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Payload sensors/config : clé capteur -> {interval, model}
pub type SensorsConfigData = HashMap<String, SensorConfigEntry>;

/// Descripteur hardware (topic {module}/hardware/config) - snapshot complet
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareData {
    pub chip: Option<ChipData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipData {
    pub model: Option<String>,
    pub rev: Option<i32>,
    pub cpu_freq_mhz: Option<i32>,
    pub flash_kb: Option<i64>,
    pub cores: Option<i32>,
}

/// Somme taguée des mises à jour de statut bufferisées.
/// Chaque variante route vers un upsert différent avec ses propres règles
/// de merge (voir Repository).
#[derive(Debug, Clone)]
pub enum StatusUpdateData {
    System(SystemData),
    SystemConfig(SystemConfigData),
    SensorsStatus(SensorsStatusData),
    SensorsConfig(SensorsConfigData),
    Hardware(HardwareData),
}

/// Mise à jour de statut en attente dans le buffer d'ingestion
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub module_id: String,
    pub data: StatusUpdateData,
}

/// Configuration d'un module pour publication vers le firmware
/// (topic {module}/sensors/config, retained)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub sensors: HashMap<String, SensorConfigEntry>,
}

/// Payload diffusé aux clients temps réel pour chaque message traité
#[derive(Debug, Clone, Serialize)]
pub struct LiveUpdate {
    pub topic: String,
    pub value: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    /// ISO8601 / RFC3339
    pub time: String,
}

/// Entrée de log matériel relayée par un module ({module}/logs)
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceLogEntry {
    pub level: Option<String>,
    pub msg: Option<String>,
}
