/**
 * HEALTH - Santé des modules et détection de trous de données
 *
 * RÔLE :
 * Toute la santé est DÉRIVÉE des timestamps de mesures et de statuts,
 * jamais d'un état "connecté" maintenu : un module qui mesure est
 * vivant, un module silencieux est mort, peu importe ce que dit TCP.
 *
 * DEUX ÉCHELLES :
 * - Statut capteur (vue sensors/status) : ok / missing / unknown,
 *   timeout = 2×intervalle + 10s de grâce, groupé par hardware (un
 *   composant qui émet N grandeurs vit ou meurt d'un bloc)
 * - Santé device : connected (<2×) / stale (<5×) / offline, agrégée en
 *   healthy / degraded / offline
 *
 * TROUS : un écart > 3×intervalle entre deux mesures consécutives est un
 * trou. Fenêtre vide = un trou couvrant toute la fenêtre. Le sweep de
 * fond (15 min) journalise les trous encore ouverts.
 */

use crate::models::ModuleConfig;
use crate::repository::{GapLogRow, Repository, RepositoryError, SensorConfigRow, SensorStatusRow};
use crate::topics::{hardware_key, split_composite};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tokio::task;

const GRACE_PERIOD_MS: i128 = 10_000;
const DEFAULT_INTERVAL_S: u32 = 60;
/// Un écart au-delà de 3× l'intervalle attendu est un trou
const GAP_FACTOR: i128 = 3;

// ============ STATUT CAPTEUR (deux états + inconnu) ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorLiveness {
    Ok,
    Missing,
    Unknown,
}

impl SensorLiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorLiveness::Ok => "ok",
            SensorLiveness::Missing => "missing",
            SensorLiveness::Unknown => "unknown",
        }
    }
}

/// Statut d'un capteur d'après sa dernière mise à jour.
/// Jamais de donnée reçue = unknown, pas missing : on ne sait pas si le
/// capteur existe encore.
pub fn calculate_sensor_status(
    last_update: Option<OffsetDateTime>,
    interval_seconds: Option<u32>,
    now: OffsetDateTime,
) -> SensorLiveness {
    let Some(last) = last_update else {
        return SensorLiveness::Unknown;
    };

    let interval = interval_seconds.unwrap_or(DEFAULT_INTERVAL_S) as i128;
    let timeout_ms = interval * 2 * 1000 + GRACE_PERIOD_MS;
    let elapsed_ms = (now - last).whole_milliseconds();

    if elapsed_ms > timeout_ms {
        SensorLiveness::Missing
    } else {
        SensorLiveness::Ok
    }
}

/// Dernière mise à jour par composant hardware : le max de tous les
/// capteurs du composant. Un SCD41 qui vient d'émettre son CO2 n'a pas
/// "perdu" sa température.
pub fn group_by_hardware_last_update(
    rows: &[SensorStatusRow],
) -> HashMap<String, OffsetDateTime> {
    let mut last_by_hardware: HashMap<String, OffsetDateTime> = HashMap::new();
    for row in rows {
        let hw = hardware_key(&row.sensor_type).to_string();
        last_by_hardware
            .entry(hw)
            .and_modify(|t| {
                if row.updated_at > *t {
                    *t = row.updated_at;
                }
            })
            .or_insert(row.updated_at);
    }
    last_by_hardware
}

/// Entrée de la vue sensors/status exposée par l'API
#[derive(Debug, Clone, Serialize)]
pub struct SensorStatusView {
    pub status: String,
    pub value: Option<f64>,
}

/// Construit la vue de statut par capteur, intervalle et fraîcheur
/// résolus au niveau hardware.
pub fn build_sensor_statuses(
    status_rows: &[SensorStatusRow],
    config_rows: &[SensorConfigRow],
    now: OffsetDateTime,
) -> HashMap<String, SensorStatusView> {
    let mut interval_by_hardware: HashMap<&str, u32> = HashMap::new();
    for row in config_rows {
        if let Some(interval) = row.interval_seconds {
            interval_by_hardware.insert(hardware_key(&row.sensor_type), interval);
        }
    }

    let last_by_hardware = group_by_hardware_last_update(status_rows);

    let mut out = HashMap::new();
    for row in status_rows {
        let hw = hardware_key(&row.sensor_type);
        let status = calculate_sensor_status(
            last_by_hardware.get(hw).copied(),
            interval_by_hardware.get(hw).copied(),
            now,
        );
        out.insert(
            row.sensor_type.clone(),
            SensorStatusView {
                status: status.as_str().to_string(),
                value: row.value,
            },
        );
    }
    out
}

// ============ SANTÉ DEVICE (trois paliers) ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorTier {
    Connected,
    Stale,
    Offline,
}

impl SensorTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorTier::Connected => "connected",
            SensorTier::Stale => "stale",
            SensorTier::Offline => "offline",
        }
    }
}

/// Palier d'un capteur d'après l'âge de sa dernière mesure.
/// Jamais vu ou sans intervalle configuré = offline.
pub fn classify_tier(elapsed: Option<Duration>, interval_seconds: Option<u32>) -> SensorTier {
    let (Some(elapsed), Some(interval)) = (elapsed, interval_seconds) else {
        return SensorTier::Offline;
    };
    let interval_ms = interval as i128 * 1000;
    let elapsed_ms = elapsed.whole_milliseconds();

    if elapsed_ms < interval_ms * 2 {
        SensorTier::Connected
    } else if elapsed_ms < interval_ms * 5 {
        SensorTier::Stale
    } else {
        SensorTier::Offline
    }
}

/// Santé d'un capteur dans la vue device
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorHealthView {
    pub sensor_type: String,
    pub status: String,
    pub last_measurement: Option<String>,
    pub seconds_since_last: Option<i64>,
    pub expected_interval_seconds: Option<u32>,
    pub gap_count: usize,
    pub longest_gap_minutes: i64,
}

/// Santé agrégée d'un module
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealthView {
    pub module_id: String,
    pub overall_status: String,
    pub uptime_percent_24h: f64,
    pub sensors: Vec<SensorHealthView>,
    pub last_update: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnhealthyDevice {
    pub module_id: String,
    pub status: String,
}

/// Trou de données détecté dans une fenêtre
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataGap {
    pub sensor_type: String,
    pub hardware_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub gap_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub gap_end: OffsetDateTime,
    pub gap_duration_minutes: i64,
    pub expected_interval_seconds: u32,
}

/// Statistiques agrégées des trous journalisés par le sweep
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapStats {
    pub window_hours: i64,
    pub total_gaps: usize,
    pub total_minutes: i64,
    pub by_module: HashMap<String, usize>,
}

fn round_minutes(d: Duration) -> i64 {
    (d.whole_milliseconds() as f64 / 60_000.0).round() as i64
}

/// Vrai si le trou est encore ouvert : sa fin date de moins d'un
/// intervalle attendu
fn is_ongoing(gap: &DataGap, now: OffsetDateTime) -> bool {
    let since_end = (now - gap.gap_end).whole_milliseconds();
    since_end < gap.expected_interval_seconds as i128 * 1000
}

pub struct HealthService {
    repo: Arc<dyn Repository>,
}

impl HealthService {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Santé complète d'un module : un palier par capteur configuré,
    /// statut global et uptime 24h.
    pub async fn device_health(
        &self,
        module_id: &str,
    ) -> Result<DeviceHealthView, RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let configs = self.repo.get_sensor_configs(module_id).await?;

        // Un capteur désactivé ne compte ni dans la vue ni dans le statut
        // global : on ne le surveille plus, il ne peut pas dégrader
        let mut sensors = Vec::with_capacity(configs.len());
        for config in configs.iter().filter(|c| c.enabled) {
            let last = self
                .repo
                .get_last_measurement_time(module_id, &config.sensor_type)
                .await?;
            let elapsed = last.map(|t| now - t);
            let tier = classify_tier(elapsed, config.interval_seconds);

            let gaps = self.detect_gaps(module_id, &config.sensor_type, 24).await?;
            let longest = gaps.iter().map(|g| g.gap_duration_minutes).max().unwrap_or(0);

            sensors.push(SensorHealthView {
                sensor_type: config.sensor_type.clone(),
                status: tier.as_str().to_string(),
                last_measurement: last.and_then(|t| t.format(&Rfc3339).ok()),
                seconds_since_last: elapsed.map(|d| d.whole_seconds()),
                expected_interval_seconds: config.interval_seconds,
                gap_count: gaps.len(),
                longest_gap_minutes: longest,
            });
        }

        let connected = sensors.iter().filter(|s| s.status == "connected").count();
        let overall = if sensors.is_empty() {
            "offline"
        } else if connected == sensors.len() {
            "healthy"
        } else if connected > 0 {
            "degraded"
        } else {
            "offline"
        };

        Ok(DeviceHealthView {
            module_id: module_id.to_string(),
            overall_status: overall.to_string(),
            uptime_percent_24h: self.uptime_percent(module_id, 24).await?,
            sensors,
            last_update: now.format(&Rfc3339).unwrap_or_default(),
        })
    }

    /// Trous d'un capteur sur les N dernières heures. Sans intervalle
    /// configuré la notion de trou n'existe pas : liste vide.
    pub async fn detect_gaps(
        &self,
        module_id: &str,
        sensor_type: &str,
        hours: i64,
    ) -> Result<Vec<DataGap>, RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let since = now - Duration::hours(hours);

        let configs = self.repo.get_sensor_configs(module_id).await?;
        let Some(config) = configs.iter().find(|c| c.sensor_type == sensor_type) else {
            return Ok(Vec::new());
        };
        let Some(interval) = config.interval_seconds else {
            return Ok(Vec::new());
        };
        let gap_threshold_ms = interval as i128 * 1000 * GAP_FACTOR;

        let (hw, _) = split_composite(sensor_type);
        let hardware_id = config
            .model
            .clone()
            .or_else(|| hw.map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());

        let times = self
            .repo
            .get_measurement_timestamps_in_window(module_id, sensor_type, since)
            .await?;

        // Aucune mesure : la fenêtre entière est un trou
        if times.is_empty() {
            return Ok(vec![DataGap {
                sensor_type: sensor_type.to_string(),
                hardware_id,
                gap_start: since,
                gap_end: now,
                gap_duration_minutes: hours * 60,
                expected_interval_seconds: interval,
            }]);
        }

        let mut gaps = Vec::new();
        for pair in times.windows(2) {
            let delta = pair[1] - pair[0];
            if delta.whole_milliseconds() > gap_threshold_ms {
                gaps.push(DataGap {
                    sensor_type: sensor_type.to_string(),
                    hardware_id: hardware_id.clone(),
                    gap_start: pair[0],
                    gap_end: pair[1],
                    gap_duration_minutes: round_minutes(delta),
                    expected_interval_seconds: interval,
                });
            }
        }

        // Trou ouvert entre la dernière mesure et maintenant
        let last = times[times.len() - 1];
        let tail = now - last;
        if tail.whole_milliseconds() > gap_threshold_ms {
            gaps.push(DataGap {
                sensor_type: sensor_type.to_string(),
                hardware_id,
                gap_start: last,
                gap_end: now,
                gap_duration_minutes: round_minutes(tail),
                expected_interval_seconds: interval,
            });
        }

        Ok(gaps)
    }

    /// Trous de tous les capteurs configurés d'un module
    pub async fn module_gaps(
        &self,
        module_id: &str,
        hours: i64,
    ) -> Result<Vec<DataGap>, RepositoryError> {
        let configs = self.repo.get_sensor_configs(module_id).await?;
        let mut all = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            all.extend(self.detect_gaps(module_id, &config.sensor_type, hours).await?);
        }
        Ok(all)
    }

    /// Pourcentage de temps couvert par des mesures, moyenné sur les
    /// capteurs actifs. Un capteur sans intervalle compte 0.
    pub async fn uptime_percent(
        &self,
        module_id: &str,
        hours: i64,
    ) -> Result<f64, RepositoryError> {
        let configs = self.repo.get_sensor_configs(module_id).await?;
        let enabled: Vec<&SensorConfigRow> = configs.iter().filter(|c| c.enabled).collect();
        if enabled.is_empty() {
            return Ok(0.0);
        }

        let total_minutes = (hours * 60) as f64;
        let mut uptimes = Vec::with_capacity(enabled.len());
        for config in &enabled {
            if config.interval_seconds.is_none() {
                uptimes.push(0.0);
                continue;
            }
            let gaps = self.detect_gaps(module_id, &config.sensor_type, hours).await?;
            let gap_minutes: i64 = gaps.iter().map(|g| g.gap_duration_minutes).sum();
            let pct = (total_minutes - gap_minutes as f64) / total_minutes * 100.0;
            uptimes.push(pct.clamp(0.0, 100.0));
        }

        let avg = uptimes.iter().sum::<f64>() / uptimes.len() as f64;
        Ok((avg * 10.0).round() / 10.0)
    }

    /// Modules dont le statut global n'est pas healthy
    pub async fn unhealthy_devices(&self) -> Result<Vec<UnhealthyDevice>, RepositoryError> {
        let mut unhealthy = Vec::new();
        for module_id in self.repo.list_module_ids().await? {
            let health = self.device_health(&module_id).await?;
            if health.overall_status != "healthy" {
                unhealthy.push(UnhealthyDevice {
                    module_id,
                    status: health.overall_status,
                });
            }
        }
        Ok(unhealthy)
    }

    /// Agrégat des trous journalisés par le sweep sur les N dernières heures
    pub async fn gap_stats(&self, hours: i64) -> Result<GapStats, RepositoryError> {
        let since = OffsetDateTime::now_utc() - Duration::hours(hours);
        let logs = self.repo.get_recent_gap_logs(since).await?;

        let mut by_module: HashMap<String, usize> = HashMap::new();
        let mut total_minutes = 0;
        for log in &logs {
            *by_module.entry(log.module_id.clone()).or_default() += 1;
            total_minutes += log.gap_duration_minutes;
        }

        Ok(GapStats {
            window_hours: hours,
            total_gaps: logs.len(),
            total_minutes,
            by_module,
        })
    }

    /// Une passe du sweep : détecte les trous de la dernière heure et
    /// journalise ceux encore ouverts. Retourne le nombre journalisé.
    pub async fn sweep_ongoing_gaps(&self) -> Result<usize, RepositoryError> {
        let now = OffsetDateTime::now_utc();
        let configs: HashMap<String, ModuleConfig> =
            self.repo.get_enabled_sensor_configs_by_module().await?;

        let mut logged = 0;
        for (module_id, config) in &configs {
            for sensor_type in config.sensors.keys() {
                let gaps = self.detect_gaps(module_id, sensor_type, 1).await?;
                for gap in gaps.into_iter().filter(|g| is_ongoing(g, now)) {
                    self.repo
                        .append_gap_log(GapLogRow {
                            id: uuid::Uuid::new_v4().to_string(),
                            module_id: module_id.clone(),
                            sensor_type: gap.sensor_type.clone(),
                            hardware_id: gap.hardware_id.clone(),
                            gap_start: gap.gap_start,
                            gap_end: gap.gap_end,
                            gap_duration_minutes: gap.gap_duration_minutes,
                            expected_interval_seconds: gap.expected_interval_seconds,
                            time: now,
                        })
                        .await?;
                    logged += 1;
                }
            }
        }

        if logged > 0 {
            eprintln!("[health] detected {logged} ongoing data gaps");
        }
        Ok(logged)
    }
}

/// Sweep de fond : toutes les 15 minutes, journalise les trous ouverts
pub fn spawn_gap_sweep(service: Arc<HealthService>) {
    task::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(15 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = service.sweep_ongoing_gaps().await {
                eprintln!("[health] gap sweep failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MqttMeasurement, SensorConfigEntry, SensorsConfigData};
    use crate::repository::MemoryRepository;
    use time::macros::datetime;

    fn status_row(sensor_type: &str, updated_at: OffsetDateTime) -> SensorStatusRow {
        SensorStatusRow {
            module_id: "serre".into(),
            sensor_type: sensor_type.into(),
            status: Some("ok".into()),
            value: Some(1.0),
            updated_at,
        }
    }

    fn config_row(sensor_type: &str, interval: Option<u32>) -> SensorConfigRow {
        SensorConfigRow {
            module_id: "serre".into(),
            sensor_type: sensor_type.into(),
            interval_seconds: interval,
            model: None,
            enabled: true,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_sensor_status_thresholds() {
        let now = datetime!(2026-08-01 12:00:00 UTC);
        let ago = |secs: i64| Some(now - Duration::seconds(secs));

        // Timeout pour 60s : 2*60 + 10 = 130s
        assert_eq!(calculate_sensor_status(None, Some(60), now), SensorLiveness::Unknown);
        assert_eq!(calculate_sensor_status(ago(30), Some(60), now), SensorLiveness::Ok);
        assert_eq!(calculate_sensor_status(ago(130), Some(60), now), SensorLiveness::Ok);
        assert_eq!(calculate_sensor_status(ago(150), Some(60), now), SensorLiveness::Missing);
        assert_eq!(calculate_sensor_status(ago(700), Some(60), now), SensorLiveness::Missing);
        // Sans intervalle configuré : défaut 60s
        assert_eq!(calculate_sensor_status(ago(150), None, now), SensorLiveness::Missing);
    }

    #[test]
    fn test_tier_thresholds() {
        let ago = |secs: i64| Some(Duration::seconds(secs));

        assert_eq!(classify_tier(ago(30), Some(60)), SensorTier::Connected);
        assert_eq!(classify_tier(ago(119), Some(60)), SensorTier::Connected);
        assert_eq!(classify_tier(ago(150), Some(60)), SensorTier::Stale);
        assert_eq!(classify_tier(ago(700), Some(60)), SensorTier::Offline);
        assert_eq!(classify_tier(None, Some(60)), SensorTier::Offline);
        assert_eq!(classify_tier(ago(30), None), SensorTier::Offline);
    }

    #[test]
    fn test_hardware_grouping_shares_freshness() {
        let now = OffsetDateTime::now_utc();
        // Le CO2 vient d'émettre, la température du même SCD41 date : les
        // deux sont ok car le composant est vivant
        let statuses = vec![
            status_row("scd41:co2", now - Duration::seconds(10)),
            status_row("scd41:temperature", now - Duration::seconds(500)),
            status_row("mq7:co", now - Duration::seconds(500)),
        ];
        let configs = vec![
            config_row("scd41:co2", Some(60)),
            config_row("mq7:co", Some(60)),
        ];

        let view = build_sensor_statuses(&statuses, &configs, now);
        assert_eq!(view["scd41:co2"].status, "ok");
        assert_eq!(view["scd41:temperature"].status, "ok");
        assert_eq!(view["mq7:co"].status, "missing");
    }

    async fn seeded_repo(
        sensor_type: &str,
        interval: Option<u32>,
        ages_seconds: &[i64],
    ) -> Arc<MemoryRepository> {
        let repo = Arc::new(MemoryRepository::new());
        let mut config: SensorsConfigData = HashMap::new();
        config.insert(
            sensor_type.into(),
            SensorConfigEntry { interval, model: None },
        );
        repo.upsert_sensor_config("serre", &config).await.unwrap();

        let now = OffsetDateTime::now_utc();
        let (hw, bare) = split_composite(sensor_type);
        let rows: Vec<MqttMeasurement> = ages_seconds
            .iter()
            .map(|age| MqttMeasurement {
                time: now - Duration::seconds(*age),
                module_id: "serre".into(),
                sensor_type: bare.into(),
                hardware_id: hw.unwrap_or("dht22").into(),
                value: 20.0,
            })
            .collect();
        repo.upsert_measurements_batch(&rows).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn test_gap_between_consecutive_measurements() {
        // Mesures à t-3590s et t-2990s : écart de 600s, intervalle 60s
        // (seuil 180s) -> un trou de 10 min, plus le trou ouvert jusqu'à
        // maintenant
        let repo = seeded_repo("dht22:temperature", Some(60), &[3590, 2990]).await;
        let service = HealthService::new(repo);

        let gaps = service.detect_gaps("serre", "dht22:temperature", 1).await.unwrap();
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].gap_duration_minutes, 10);
        assert_eq!(gaps[1].gap_duration_minutes, 50);
        assert_eq!(gaps[0].expected_interval_seconds, 60);
    }

    #[tokio::test]
    async fn test_single_gap_when_tail_is_fresh() {
        // Écart de 600s entre deux mesures, la seconde toute fraîche :
        // un seul trou, pas de trou ouvert en fin de fenêtre
        let repo = seeded_repo("dht22:temperature", Some(60), &[610, 10]).await;
        let service = HealthService::new(repo);

        let gaps = service.detect_gaps("serre", "dht22:temperature", 1).await.unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_duration_minutes, 10);
    }

    #[tokio::test]
    async fn test_empty_window_is_one_full_gap() {
        let repo = seeded_repo("dht22:temperature", Some(60), &[]).await;
        let service = HealthService::new(repo);

        let gaps = service.detect_gaps("serre", "dht22:temperature", 1).await.unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].gap_duration_minutes, 60);
    }

    #[tokio::test]
    async fn test_no_interval_means_no_gaps() {
        let repo = seeded_repo("dht22:temperature", None, &[3590]).await;
        let service = HealthService::new(repo);

        let gaps = service.detect_gaps("serre", "dht22:temperature", 1).await.unwrap();
        assert!(gaps.is_empty());
    }

    #[tokio::test]
    async fn test_recent_measurements_no_gap() {
        let repo = seeded_repo("dht22:temperature", Some(60), &[90, 30]).await;
        let service = HealthService::new(repo);

        let gaps = service.detect_gaps("serre", "dht22:temperature", 1).await.unwrap();
        assert!(gaps.is_empty());

        let uptime = service.uptime_percent("serre", 1).await.unwrap();
        assert_eq!(uptime, 100.0);
    }

    #[tokio::test]
    async fn test_uptime_zero_when_silent() {
        let repo = seeded_repo("dht22:temperature", Some(60), &[]).await;
        let service = HealthService::new(repo);

        assert_eq!(service.uptime_percent("serre", 1).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_uptime_averages_across_sensors() {
        // Capteur 1 : données fraîches (100%), capteur 2 : silence (0%)
        let repo = seeded_repo("dht22:temperature", Some(60), &[30]).await;
        let mut config: SensorsConfigData = HashMap::new();
        config.insert(
            "mq7:co".into(),
            SensorConfigEntry { interval: Some(60), model: None },
        );
        repo.upsert_sensor_config("serre", &config).await.unwrap();
        let service = HealthService::new(repo);

        assert_eq!(service.uptime_percent("serre", 1).await.unwrap(), 50.0);
    }

    #[tokio::test]
    async fn test_device_health_degraded_when_one_sensor_silent() {
        let repo = seeded_repo("dht22:temperature", Some(60), &[30]).await;
        let mut config: SensorsConfigData = HashMap::new();
        config.insert(
            "mq7:co".into(),
            SensorConfigEntry { interval: Some(60), model: None },
        );
        repo.upsert_sensor_config("serre", &config).await.unwrap();
        let service = HealthService::new(repo);

        let health = service.device_health("serre").await.unwrap();
        assert_eq!(health.overall_status, "degraded");
        assert_eq!(health.sensors.len(), 2);

        let temp = health
            .sensors
            .iter()
            .find(|s| s.sensor_type == "dht22:temperature")
            .unwrap();
        assert_eq!(temp.status, "connected");
        let co = health.sensors.iter().find(|s| s.sensor_type == "mq7:co").unwrap();
        assert_eq!(co.status, "offline");
    }

    #[tokio::test]
    async fn test_device_health_ignores_disabled_sensors() {
        // Un capteur actif avec des données fraîches + un capteur
        // désactivé et silencieux : le désactivé ne doit ni apparaître
        // dans la vue ni tirer le statut global vers degraded
        let repo = seeded_repo("dht22:temperature", Some(60), &[30]).await;
        let mut config: SensorsConfigData = HashMap::new();
        config.insert(
            "mq7:co".into(),
            SensorConfigEntry { interval: Some(60), model: None },
        );
        repo.upsert_sensor_config("serre", &config).await.unwrap();
        repo.set_sensor_enabled("serre", "mq7", false).await.unwrap();
        let service = HealthService::new(repo);

        let health = service.device_health("serre").await.unwrap();
        assert_eq!(health.sensors.len(), 1);
        assert_eq!(health.sensors[0].sensor_type, "dht22:temperature");
        assert_eq!(health.overall_status, "healthy");
    }

    #[tokio::test]
    async fn test_device_health_offline_without_sensors() {
        let repo = Arc::new(MemoryRepository::new());
        let service = HealthService::new(repo);

        let health = service.device_health("fantome").await.unwrap();
        assert_eq!(health.overall_status, "offline");
        assert_eq!(health.uptime_percent_24h, 0.0);
        assert!(health.sensors.is_empty());
    }

    #[test]
    fn test_ongoing_gap_filter() {
        let now = OffsetDateTime::now_utc();
        let gap = |end_age: i64| DataGap {
            sensor_type: "dht22:temperature".into(),
            hardware_id: "dht22".into(),
            gap_start: now - Duration::seconds(end_age + 600),
            gap_end: now - Duration::seconds(end_age),
            gap_duration_minutes: 10,
            expected_interval_seconds: 60,
        };

        // Fini il y a 30s : encore ouvert; il y a 120s : refermé
        assert!(is_ongoing(&gap(30), now));
        assert!(!is_ongoing(&gap(120), now));
    }

    #[tokio::test]
    async fn test_sweep_logs_ongoing_gaps() {
        // Dernière mesure il y a 10 min, intervalle 60s : trou ouvert
        let repo = seeded_repo("dht22:temperature", Some(60), &[600]).await;
        let service = HealthService::new(repo.clone());

        let logged = service.sweep_ongoing_gaps().await.unwrap();
        assert_eq!(logged, 1);

        let stats = service.gap_stats(1).await.unwrap();
        assert_eq!(stats.total_gaps, 1);
        assert_eq!(stats.by_module["serre"], 1);
        assert_eq!(stats.total_minutes, 10);
    }
}
