/**
 * REPOSITORY - Interface de persistance du pipeline d'ingestion
 *
 * RÔLE : Contrat unique entre le core et le store (upserts à clés
 * composites, requêtes de santé). La couche SQL/TimescaleDB est un
 * collaborateur externe qui implémente ce trait; le kernel embarque
 * MemoryRepository (maps en mémoire + snapshot JSON) pour les tests et
 * l'exécution autonome.
 *
 * RÈGLES DE MERGE (critiques, voir aussi les tests) :
 * - measurements : upsert sur (time, module, sensor_type, hardware_id),
 *   seul value est écrasé en cas de conflit
 * - system : rssi toujours écrasé; heap_* conservés si absents (COALESCE)
 * - system_config : chaque champ conservé si absent, SAUF booted_at qui
 *   est toujours écrasé quand un uptime est fourni (un reboot doit
 *   toujours être reflété, même vers un instant antérieur)
 * - hardware : écrasement complet (snapshot)
 * - sensors_config : interval/model conservés si absents
 *
 * La création de module est implicite : un upsert crée la ligne si elle
 * n'existe pas (il n'y a pas d'étape d'enregistrement séparée).
 */

use crate::models::{
    HardwareData, ModuleConfig, MqttMeasurement, SensorConfigEntry, SensorsConfigData,
    SensorsStatusData, SystemConfigData, SystemData,
};
use crate::topics::{hardware_key, split_composite};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use time::{Duration, OffsetDateTime};

/// Erreurs des opérations de persistance
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ligne device_system_status (une par module, créée au premier message)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSystemStatusRow {
    pub module_id: String,
    /// Nom affiché (défini par l'utilisateur)
    pub name: Option<String>,
    /// "air-quality", "lighting", etc.
    pub module_type: Option<String>,
    /// Zone assignée (nullable, la suppression d'une zone désassigne)
    pub zone_id: Option<String>,
    pub ip: Option<String>,
    pub mac: Option<String>,
    pub booted_at: Option<OffsetDateTime>,
    pub rssi: Option<i32>,
    pub flash_used_kb: Option<i64>,
    pub flash_free_kb: Option<i64>,
    pub flash_system_kb: Option<i64>,
    pub heap_total_kb: Option<i64>,
    pub heap_free_kb: Option<i64>,
    pub heap_min_free_kb: Option<i64>,
    pub updated_at: OffsetDateTime,
    /// Préférences libres clé-valeur
    pub preferences: Option<serde_json::Value>,
}

impl DeviceSystemStatusRow {
    fn new(module_id: &str, now: OffsetDateTime) -> Self {
        Self {
            module_id: module_id.to_string(),
            name: None,
            module_type: None,
            zone_id: None,
            ip: None,
            mac: None,
            booted_at: None,
            rssi: None,
            flash_used_kb: None,
            flash_free_kb: None,
            flash_system_kb: None,
            heap_total_kb: None,
            heap_free_kb: None,
            heap_min_free_kb: None,
            updated_at: now,
            preferences: None,
        }
    }
}

/// Ligne device_hardware (descripteur statique de la puce)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHardwareRow {
    pub module_id: String,
    pub chip_model: Option<String>,
    pub chip_rev: Option<i32>,
    pub cpu_freq_mhz: Option<i32>,
    pub flash_kb: Option<i64>,
    pub cores: Option<i32>,
    pub updated_at: OffsetDateTime,
}

/// Ligne sensor_status : dernier {status, value} par (module, type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorStatusRow {
    pub module_id: String,
    pub sensor_type: String,
    pub status: Option<String>,
    pub value: Option<f64>,
    pub updated_at: OffsetDateTime,
}

/// Ligne sensor_config : intervalle de rapport par (module, type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfigRow {
    pub module_id: String,
    pub sensor_type: String,
    pub interval_seconds: Option<u32>,
    pub model: Option<String>,
    pub enabled: bool,
    pub updated_at: OffsetDateTime,
}

/// Ligne de log de diagnostic pour un trou de données détecté
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapLogRow {
    pub id: String,
    pub module_id: String,
    pub sensor_type: String,
    pub hardware_id: String,
    pub gap_start: OffsetDateTime,
    pub gap_end: OffsetDateTime,
    pub gap_duration_minutes: i64,
    pub expected_interval_seconds: u32,
    pub time: OffsetDateTime,
}

/// Interface consommée par le core. Implémentée par la couche de
/// persistance (externe) et par MemoryRepository ci-dessous.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Upsert d'un batch de mesures sur la clé naturelle 4-uplet.
    /// En cas de conflit seul value est écrasé (tolère le at-least-once).
    async fn upsert_measurements_batch(
        &self,
        rows: &[MqttMeasurement],
    ) -> Result<(), RepositoryError>;

    async fn upsert_system_status(
        &self,
        module_id: &str,
        data: &SystemData,
    ) -> Result<(), RepositoryError>;

    async fn upsert_system_config(
        &self,
        module_id: &str,
        data: &SystemConfigData,
    ) -> Result<(), RepositoryError>;

    async fn upsert_sensor_status(
        &self,
        module_id: &str,
        data: &SensorsStatusData,
    ) -> Result<(), RepositoryError>;

    async fn upsert_sensor_config(
        &self,
        module_id: &str,
        data: &SensorsConfigData,
    ) -> Result<(), RepositoryError>;

    async fn upsert_hardware(
        &self,
        module_id: &str,
        data: &HardwareData,
    ) -> Result<(), RepositoryError>;

    /// Configs actives groupées par module (pour la republication MQTT)
    async fn get_enabled_sensor_configs_by_module(
        &self,
    ) -> Result<HashMap<String, ModuleConfig>, RepositoryError>;

    /// Dernière mesure pour un capteur. Résout les clés composites
    /// "scd41:co2" en (hardware_id, type nu).
    async fn get_last_measurement_time(
        &self,
        module_id: &str,
        sensor_type: &str,
    ) -> Result<Option<OffsetDateTime>, RepositoryError>;

    /// Timestamps de mesures dans la fenêtre, tri ascendant
    async fn get_measurement_timestamps_in_window(
        &self,
        module_id: &str,
        sensor_type: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<OffsetDateTime>, RepositoryError>;

    async fn get_sensor_configs(
        &self,
        module_id: &str,
    ) -> Result<Vec<SensorConfigRow>, RepositoryError>;

    async fn get_sensor_status(
        &self,
        module_id: &str,
    ) -> Result<Vec<SensorStatusRow>, RepositoryError>;

    async fn list_module_ids(&self) -> Result<Vec<String>, RepositoryError>;

    async fn get_system_status(
        &self,
        module_id: &str,
    ) -> Result<Option<DeviceSystemStatusRow>, RepositoryError>;

    async fn get_hardware_info(
        &self,
        module_id: &str,
    ) -> Result<Option<DeviceHardwareRow>, RepositoryError>;

    /// Active/désactive toutes les configs dont le préfixe hardware
    /// correspond. Retourne le nombre de lignes touchées.
    async fn set_sensor_enabled(
        &self,
        module_id: &str,
        hardware: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError>;

    /// Append-only : trace de diagnostic pour un trou détecté
    async fn append_gap_log(&self, row: GapLogRow) -> Result<(), RepositoryError>;

    async fn get_recent_gap_logs(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<GapLogRow>, RepositoryError>;
}

// ============ IMPLÉMENTATION MÉMOIRE ============

/// Clé naturelle d'une mesure : (time, module, sensor_type, hardware_id)
type MeasurementKey = (OffsetDateTime, String, String, String);

/// État interne du store. Les mesures ne sont pas snapshotées (c'est le
/// domaine du store time-series externe), l'état des modules l'est.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreInner {
    #[serde(skip)]
    measurements: BTreeMap<MeasurementKey, f64>,
    system_status: HashMap<String, DeviceSystemStatusRow>,
    hardware: HashMap<String, DeviceHardwareRow>,
    /// module -> sensor_type -> ligne
    sensor_status: HashMap<String, HashMap<String, SensorStatusRow>>,
    sensor_config: HashMap<String, HashMap<String, SensorConfigRow>>,
    gap_logs: Vec<GapLogRow>,
}

/// Store en mémoire avec les mêmes contrats d'upsert que la couche SQL.
/// Persistance optionnelle de l'état des modules en JSON (même mécanique
/// que agents.json).
pub struct MemoryRepository {
    inner: Mutex<StoreInner>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            snapshot_path: None,
        }
    }

    pub fn with_snapshot<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Recharge l'état des modules depuis le snapshot JSON (si présent)
    pub async fn load_snapshot(&self) -> Result<(), RepositoryError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        if !path.exists() {
            println!("[store] no existing snapshot, starting fresh");
            return Ok(());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let loaded: StoreInner = serde_json::from_str(&content)?;
        let mut inner = self.inner.lock();
        let modules = loaded.system_status.len();
        *inner = loaded;
        println!("[store] loaded snapshot ({} modules) from {:?}", modules, path);
        Ok(())
    }

    /// Sauvegarde l'état des modules dans le snapshot JSON
    pub async fn save_snapshot(&self) -> Result<(), RepositoryError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let content = {
            let inner = self.inner.lock();
            serde_json::to_string_pretty(&*inner)?
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Nombre de mesures stockées (assertions de tests)
    pub fn measurement_count(&self) -> usize {
        self.inner.lock().measurements.len()
    }

    /// Lecture directe d'une valeur de mesure par sa clé (tests)
    pub fn measurement_value(
        &self,
        time: OffsetDateTime,
        module_id: &str,
        sensor_type: &str,
        hardware_id: &str,
    ) -> Option<f64> {
        self.inner
            .lock()
            .measurements
            .get(&(
                time,
                module_id.to_string(),
                sensor_type.to_string(),
                hardware_id.to_string(),
            ))
            .copied()
    }

    pub fn system_status_row(&self, module_id: &str) -> Option<DeviceSystemStatusRow> {
        self.inner.lock().system_status.get(module_id).cloned()
    }

    pub fn hardware_row(&self, module_id: &str) -> Option<DeviceHardwareRow> {
        self.inner.lock().hardware.get(module_id).cloned()
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn upsert_measurements_batch(
        &self,
        rows: &[MqttMeasurement],
    ) -> Result<(), RepositoryError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        for m in rows {
            let key = (
                m.time,
                m.module_id.clone(),
                m.sensor_type.clone(),
                m.hardware_id.clone(),
            );
            // Conflit sur la clé : seul value est écrasé (last write wins)
            inner.measurements.insert(key, m.value);
        }
        Ok(())
    }

    async fn upsert_system_status(
        &self,
        module_id: &str,
        data: &SystemData,
    ) -> Result<(), RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();
        let row = inner
            .system_status
            .entry(module_id.to_string())
            .or_insert_with(|| DeviceSystemStatusRow::new(module_id, now));

        // rssi toujours écrasé, heap_* conservés si absents
        row.rssi = data.rssi;
        if let Some(memory) = &data.memory {
            if memory.heap_free_kb.is_some() {
                row.heap_free_kb = memory.heap_free_kb;
            }
            if memory.heap_min_free_kb.is_some() {
                row.heap_min_free_kb = memory.heap_min_free_kb;
            }
        }
        row.updated_at = now;
        Ok(())
    }

    async fn upsert_system_config(
        &self,
        module_id: &str,
        data: &SystemConfigData,
    ) -> Result<(), RepositoryError> {
        let now = OffsetDateTime::now_utc();

        // booted_at recalculé depuis l'uptime rapporté, jamais accumulé.
        // Un uptime qui diminue signifie un reboot et doit être reflété.
        let booted_at = data
            .uptime_start
            .as_ref()
            .and_then(|u| u.as_seconds())
            .map(|secs| now - Duration::seconds(secs));

        let mut inner = self.inner.lock();
        let row = inner
            .system_status
            .entry(module_id.to_string())
            .or_insert_with(|| DeviceSystemStatusRow::new(module_id, now));

        if data.module_type.is_some() {
            row.module_type = data.module_type.clone();
        }
        if data.ip.is_some() {
            row.ip = data.ip.clone();
        }
        if data.mac.is_some() {
            row.mac = data.mac.clone();
        }
        // booted_at : écrasé dès qu'un uptime est fourni, même antérieur
        if booted_at.is_some() {
            row.booted_at = booted_at;
        }
        if data.rssi.is_some() {
            row.rssi = data.rssi;
        }
        if let Some(flash) = &data.flash {
            if flash.used_kb.is_some() {
                row.flash_used_kb = flash.used_kb;
            }
            if flash.free_kb.is_some() {
                row.flash_free_kb = flash.free_kb;
            }
            // total_kb ou champ legacy system_kb
            if let Some(system) = flash.total_kb.or(flash.system_kb) {
                row.flash_system_kb = Some(system);
            }
        }
        if let Some(memory) = &data.memory {
            if memory.heap_total_kb.is_some() {
                row.heap_total_kb = memory.heap_total_kb;
            }
            if memory.heap_free_kb.is_some() {
                row.heap_free_kb = memory.heap_free_kb;
            }
            if memory.heap_min_free_kb.is_some() {
                row.heap_min_free_kb = memory.heap_min_free_kb;
            }
        }
        row.updated_at = now;
        Ok(())
    }

    async fn upsert_sensor_status(
        &self,
        module_id: &str,
        data: &SensorsStatusData,
    ) -> Result<(), RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();
        let module = inner
            .sensor_status
            .entry(module_id.to_string())
            .or_default();

        for (sensor_type, reading) in data {
            module.insert(
                sensor_type.clone(),
                SensorStatusRow {
                    module_id: module_id.to_string(),
                    sensor_type: sensor_type.clone(),
                    status: Some(reading.status.clone()),
                    value: reading.value,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn upsert_sensor_config(
        &self,
        module_id: &str,
        data: &SensorsConfigData,
    ) -> Result<(), RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();
        let module = inner
            .sensor_config
            .entry(module_id.to_string())
            .or_default();

        for (sensor_type, entry) in data {
            match module.get_mut(sensor_type) {
                Some(row) => {
                    // interval/model conservés quand le message les omet
                    if entry.interval.is_some() {
                        row.interval_seconds = entry.interval;
                    }
                    if entry.model.is_some() {
                        row.model = entry.model.clone();
                    }
                    row.updated_at = now;
                }
                None => {
                    module.insert(
                        sensor_type.clone(),
                        SensorConfigRow {
                            module_id: module_id.to_string(),
                            sensor_type: sensor_type.clone(),
                            interval_seconds: entry.interval,
                            model: entry.model.clone(),
                            enabled: true,
                            updated_at: now,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    async fn upsert_hardware(
        &self,
        module_id: &str,
        data: &HardwareData,
    ) -> Result<(), RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let chip = data.chip.clone().unwrap_or_default();
        let mut inner = self.inner.lock();
        // Snapshot complet : écrasement de tous les champs
        inner.hardware.insert(
            module_id.to_string(),
            DeviceHardwareRow {
                module_id: module_id.to_string(),
                chip_model: chip.model,
                chip_rev: chip.rev,
                cpu_freq_mhz: chip.cpu_freq_mhz,
                flash_kb: chip.flash_kb,
                cores: chip.cores,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn get_enabled_sensor_configs_by_module(
        &self,
    ) -> Result<HashMap<String, ModuleConfig>, RepositoryError> {
        let inner = self.inner.lock();
        let mut by_module: HashMap<String, ModuleConfig> = HashMap::new();

        for (module_id, sensors) in &inner.sensor_config {
            for row in sensors.values().filter(|r| r.enabled) {
                by_module
                    .entry(module_id.clone())
                    .or_default()
                    .sensors
                    .insert(
                        row.sensor_type.clone(),
                        SensorConfigEntry {
                            interval: row.interval_seconds,
                            model: None,
                        },
                    );
            }
        }
        Ok(by_module)
    }

    async fn get_last_measurement_time(
        &self,
        module_id: &str,
        sensor_type: &str,
    ) -> Result<Option<OffsetDateTime>, RepositoryError> {
        let (hw, bare) = split_composite(sensor_type);
        let inner = self.inner.lock();
        let last = inner
            .measurements
            .keys()
            .filter(|(_, m, s, h)| {
                m == module_id && s == bare && hw.map(|w| h == w).unwrap_or(true)
            })
            .map(|(t, _, _, _)| *t)
            .max();
        Ok(last)
    }

    async fn get_measurement_timestamps_in_window(
        &self,
        module_id: &str,
        sensor_type: &str,
        since: OffsetDateTime,
    ) -> Result<Vec<OffsetDateTime>, RepositoryError> {
        let (hw, bare) = split_composite(sensor_type);
        let inner = self.inner.lock();
        // BTreeMap ordonnée par time : le scan sort déjà trié ascendant
        let times = inner
            .measurements
            .keys()
            .filter(|(t, m, s, h)| {
                *t > since && m == module_id && s == bare && hw.map(|w| h == w).unwrap_or(true)
            })
            .map(|(t, _, _, _)| *t)
            .collect();
        Ok(times)
    }

    async fn get_sensor_configs(
        &self,
        module_id: &str,
    ) -> Result<Vec<SensorConfigRow>, RepositoryError> {
        let inner = self.inner.lock();
        let mut rows: Vec<SensorConfigRow> = inner
            .sensor_config
            .get(module_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.sensor_type.cmp(&b.sensor_type));
        Ok(rows)
    }

    async fn get_sensor_status(
        &self,
        module_id: &str,
    ) -> Result<Vec<SensorStatusRow>, RepositoryError> {
        let inner = self.inner.lock();
        let mut rows: Vec<SensorStatusRow> = inner
            .sensor_status
            .get(module_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.sensor_type.cmp(&b.sensor_type));
        Ok(rows)
    }

    async fn list_module_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let inner = self.inner.lock();
        let mut ids: Vec<String> = inner.system_status.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_system_status(
        &self,
        module_id: &str,
    ) -> Result<Option<DeviceSystemStatusRow>, RepositoryError> {
        Ok(self.inner.lock().system_status.get(module_id).cloned())
    }

    async fn get_hardware_info(
        &self,
        module_id: &str,
    ) -> Result<Option<DeviceHardwareRow>, RepositoryError> {
        Ok(self.inner.lock().hardware.get(module_id).cloned())
    }

    async fn set_sensor_enabled(
        &self,
        module_id: &str,
        hardware: &str,
        enabled: bool,
    ) -> Result<usize, RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let mut inner = self.inner.lock();
        let Some(module) = inner.sensor_config.get_mut(module_id) else {
            return Ok(0);
        };
        let mut touched = 0;
        for row in module.values_mut() {
            if hardware_key(&row.sensor_type) == hardware {
                row.enabled = enabled;
                row.updated_at = now;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn append_gap_log(&self, row: GapLogRow) -> Result<(), RepositoryError> {
        self.inner.lock().gap_logs.push(row);
        Ok(())
    }

    async fn get_recent_gap_logs(
        &self,
        since: OffsetDateTime,
    ) -> Result<Vec<GapLogRow>, RepositoryError> {
        let inner = self.inner.lock();
        Ok(inner
            .gap_logs
            .iter()
            .filter(|g| g.time >= since)
            .cloned()
            .collect())
    }
}
