/**
 * INGEST - Pipeline d'ingestion des messages MQTT des modules
 *
 * RÔLE :
 * Reçoit tous les messages du broker (souscription "#"), les classifie,
 * valide les mesures contre les manifests, et bufferise avant écriture
 * groupée dans le store. Le handler ne retourne jamais d'erreur vers la
 * boucle MQTT : un payload malformé est loggé puis oublié, jamais fatal.
 *
 * FONCTIONNEMENT :
 * - Mesures : buffer de 100 ou flush toutes les 5s
 * - Statuts : buffer de 50 ou flush toutes les 2.5s
 * - Échec du batch de mesures → re-file en TÊTE de buffer, ordre préservé
 *   (retry sans limite : un store durablement indisponible fait grossir
 *   le buffer, la supervision est le garde-fou)
 * - Échec d'un statut → loggé, le reste du batch continue
 *
 * UTILITÉ DANS SERRA :
 * 🎯 Une écriture pour 100 mesures au lieu de 100 écritures
 * 🎯 Les modules ne savent rien du store : ils publient, point
 * 🎯 La validation rejette les valeurs physiquement absurdes à l'entrée
 */

use crate::broadcast::Broadcaster;
use crate::config::{KernelConfig, MqttConf};
use crate::models::{
    DeviceLogEntry, HardwareData, MqttMeasurement, SensorsConfigData, SensorsStatusData,
    StatusUpdate, StatusUpdateData, SystemConfigData, SystemData,
};
use crate::publisher::ConfigPublisher;
use crate::registry::ModuleRegistry;
use crate::repository::Repository;
use crate::topics::{classify, parse_measurement, parse_topic, validate_value, MessageCategory,
    TopicParts, ValueCheck};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::task;

/// Flush des mesures : au centième ou toutes les 5s
pub const MEASUREMENT_BUFFER_MAX: usize = 100;
pub const MEASUREMENT_FLUSH_MS: u64 = 5_000;
/// Flush des statuts : au cinquantième ou toutes les 2.5s
pub const STATUS_BUFFER_MAX: usize = 50;
pub const STATUS_FLUSH_MS: u64 = 2_500;

/// Buffers d'écriture partagés entre le handler et les timers de flush
pub struct IngestionBuffers {
    measurements: Mutex<Vec<MqttMeasurement>>,
    statuses: Mutex<Vec<StatusUpdate>>,
}

impl IngestionBuffers {
    pub fn new() -> Self {
        Self {
            measurements: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    /// Push une mesure, retourne la taille du buffer après insertion
    fn push_measurement(&self, m: MqttMeasurement) -> usize {
        let mut buf = self.measurements.lock();
        buf.push(m);
        buf.len()
    }

    fn push_status(&self, s: StatusUpdate) -> usize {
        let mut buf = self.statuses.lock();
        buf.push(s);
        buf.len()
    }

    /// Draine le buffer de mesures (le lock n'est jamais tenu pendant l'I/O)
    fn take_measurements(&self) -> Vec<MqttMeasurement> {
        mem::take(&mut *self.measurements.lock())
    }

    fn take_statuses(&self) -> Vec<StatusUpdate> {
        mem::take(&mut *self.statuses.lock())
    }

    /// Re-file un batch échoué en tête du buffer. Les mesures arrivées
    /// pendant le flush passent derrière : l'ordre chronologique global
    /// est préservé.
    fn requeue_measurements(&self, batch: Vec<MqttMeasurement>) {
        let mut buf = self.measurements.lock();
        let tail = mem::take(&mut *buf);
        *buf = batch;
        buf.extend(tail);
    }

    pub fn measurement_len(&self) -> usize {
        self.measurements.lock().len()
    }

    pub fn status_len(&self) -> usize {
        self.statuses.lock().len()
    }
}

impl Default for IngestionBuffers {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler central : chaque publish MQTT passe par handle_message
pub struct MessageHandler {
    repo: Arc<dyn Repository>,
    registry: Arc<ModuleRegistry>,
    broadcaster: Broadcaster,
    buffers: IngestionBuffers,
}

impl MessageHandler {
    pub fn new(
        repo: Arc<dyn Repository>,
        registry: Arc<ModuleRegistry>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            repo,
            registry,
            broadcaster,
            buffers: IngestionBuffers::new(),
        }
    }

    pub fn buffers(&self) -> &IngestionBuffers {
        &self.buffers
    }

    /// Point d'entrée d'un message brut. Ne retourne jamais d'erreur :
    /// tout problème est loggé et le message est considéré traité.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);

        // Fan-out temps réel systématique, avant tout filtrage : les
        // dashboards voient aussi ce que la persistance ignore
        self.broadcaster.publish_raw(topic, &text);

        // Modules de dev/domotique voisine : ignorés silencieusement
        let Some(parsed) = parse_topic(topic) else {
            return;
        };

        match classify(topic, &parsed) {
            MessageCategory::Measurement => self.handle_measurement(&parsed, &text).await,
            MessageCategory::System => {
                self.decode_status::<SystemData>(&parsed, topic, &text, StatusUpdateData::System)
                    .await
            }
            MessageCategory::SystemConfig => {
                self.decode_status::<SystemConfigData>(
                    &parsed,
                    topic,
                    &text,
                    StatusUpdateData::SystemConfig,
                )
                .await
            }
            MessageCategory::SensorsStatus => {
                self.handle_sensor_status(&parsed.module_id, topic, &text).await
            }
            MessageCategory::SensorsConfig => {
                self.decode_status::<SensorsConfigData>(
                    &parsed,
                    topic,
                    &text,
                    StatusUpdateData::SensorsConfig,
                )
                .await
            }
            MessageCategory::HardwareConfig => {
                self.decode_status::<HardwareData>(
                    &parsed,
                    topic,
                    &text,
                    StatusUpdateData::Hardware,
                )
                .await
            }
            MessageCategory::Logs => self.relay_device_log(&parsed.module_id, &text),
            MessageCategory::Unknown => {
                println!("[ingest] unhandled topic: {topic}");
            }
        }
    }

    /// Mesure : parse, canonise, valide, bufferise
    async fn handle_measurement(&self, parsed: &TopicParts, payload: &str) {
        let Some(m) = parse_measurement(parsed, payload) else {
            eprintln!(
                "[ingest] invalid measurement payload from {}: {payload:?}",
                parsed.module_id
            );
            return;
        };

        let check = validate_value(&m.sensor_type, m.value, |t| {
            self.registry.get_validation_range(t)
        });
        if let ValueCheck::OutOfRange(range) = check {
            // Rejet = message traité, pas une erreur du pipeline
            println!(
                "[ingest] rejected {}={} from {} (valid range [{}, {}])",
                m.sensor_type, m.value, m.module_id, range.min, range.max
            );
            return;
        }

        let row = MqttMeasurement {
            time: OffsetDateTime::now_utc(),
            module_id: m.module_id,
            sensor_type: m.sensor_type,
            hardware_id: m.hardware_id,
            value: m.value,
        };
        if self.buffers.push_measurement(row) >= MEASUREMENT_BUFFER_MAX {
            self.flush_measurements().await;
        }
    }

    /// Décode un payload JSON de statut et le bufferise
    async fn decode_status<T: serde::de::DeserializeOwned>(
        &self,
        parsed: &TopicParts,
        topic: &str,
        payload: &str,
        wrap: fn(T) -> StatusUpdateData,
    ) {
        match serde_json::from_str::<T>(payload) {
            Ok(data) => {
                self.push_status(StatusUpdate {
                    module_id: parsed.module_id.clone(),
                    data: wrap(data),
                })
                .await
            }
            Err(e) => eprintln!("[ingest] invalid payload on {topic}: {e}"),
        }
    }

    /// sensors/status existe en deux formats :
    /// - enveloppé : {"moduleId", "moduleType", "sensors": {...}} (récent,
    ///   le moduleType est propagé vers la ligne système du module)
    /// - plat : directement la map capteur -> {status, value} (legacy)
    async fn handle_sensor_status(&self, module_id: &str, topic: &str, payload: &str) {
        let value: serde_json::Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("[ingest] invalid payload on {topic}: {e}");
                return;
            }
        };

        let (sensors_value, module_type) = match value.get("sensors") {
            Some(sensors) => (
                sensors.clone(),
                value
                    .get("moduleType")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            ),
            None => (value, None),
        };

        if module_type.is_some() {
            self.push_status(StatusUpdate {
                module_id: module_id.to_string(),
                data: StatusUpdateData::SystemConfig(SystemConfigData {
                    module_type,
                    ..Default::default()
                }),
            })
            .await;
        }

        match serde_json::from_value::<SensorsStatusData>(sensors_value) {
            Ok(data) => {
                self.push_status(StatusUpdate {
                    module_id: module_id.to_string(),
                    data: StatusUpdateData::SensorsStatus(data),
                })
                .await
            }
            Err(e) => eprintln!("[ingest] invalid payload on {topic}: {e}"),
        }
    }

    async fn push_status(&self, update: StatusUpdate) {
        if self.buffers.push_status(update) >= STATUS_BUFFER_MAX {
            self.flush_statuses().await;
        }
    }

    /// Relais local des logs firmware ({module}/logs)
    fn relay_device_log(&self, module_id: &str, payload: &str) {
        match serde_json::from_str::<DeviceLogEntry>(payload) {
            Ok(entry) => {
                let level = entry.level.as_deref().unwrap_or("info");
                let msg = entry.msg.as_deref().unwrap_or("");
                match level {
                    "error" | "warn" => eprintln!("[hardware:{module_id}] {level}: {msg}"),
                    _ => println!("[hardware:{module_id}] {level}: {msg}"),
                }
            }
            Err(_) => println!("[hardware:{module_id}] {payload}"),
        }
    }

    /// Flush du buffer de mesures. Une seule écriture batch; en cas
    /// d'échec le batch entier repart en tête pour le prochain flush.
    pub async fn flush_measurements(&self) {
        let batch = self.buffers.take_measurements();
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        match self.repo.upsert_measurements_batch(&batch).await {
            Ok(()) => println!("[ingest] flushed {count} measurements"),
            Err(e) => {
                eprintln!("[ingest] measurement flush failed, requeueing {count}: {e}");
                self.buffers.requeue_measurements(batch);
            }
        }
    }

    /// Flush du buffer de statuts. Traitement séquentiel : un statut qui
    /// échoue est loggé, les suivants passent quand même.
    pub async fn flush_statuses(&self) {
        let batch = self.buffers.take_statuses();
        if batch.is_empty() {
            return;
        }
        let count = batch.len();
        let mut failed = 0;
        for update in &batch {
            let result = match &update.data {
                StatusUpdateData::System(d) => {
                    self.repo.upsert_system_status(&update.module_id, d).await
                }
                StatusUpdateData::SystemConfig(d) => {
                    self.repo.upsert_system_config(&update.module_id, d).await
                }
                StatusUpdateData::SensorsStatus(d) => {
                    self.repo.upsert_sensor_status(&update.module_id, d).await
                }
                StatusUpdateData::SensorsConfig(d) => {
                    self.repo.upsert_sensor_config(&update.module_id, d).await
                }
                StatusUpdateData::Hardware(d) => {
                    self.repo.upsert_hardware(&update.module_id, d).await
                }
            };
            if let Err(e) = result {
                failed += 1;
                eprintln!("[ingest] status upsert failed for {}: {e}", update.module_id);
            }
        }
        if failed == 0 {
            println!("[ingest] flushed {count} status updates");
        } else {
            eprintln!("[ingest] flushed {count} status updates ({failed} failed)");
        }
    }
}

/// Crée le client MQTT partagé (listener + publisher)
pub fn create_mqtt_client(cfg: &KernelConfig) -> (AsyncClient, EventLoop) {
    let mqtt = cfg
        .mqtt
        .clone()
        .unwrap_or_else(|| MqttConf { host: "localhost".into(), port: 1883 });
    let mut opts = MqttOptions::new("serra-kernel", &mqtt.host, mqtt.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 64)
}

/// Boucle MQTT principale : souscrit à tout, route vers le handler.
/// À chaque ConnAck les configs capteurs sont republiées (le broker peut
/// avoir perdu ses retained après un redémarrage).
pub fn spawn_mqtt_listener(
    client: AsyncClient,
    mut eventloop: EventLoop,
    handler: Arc<MessageHandler>,
    publisher: Arc<ConfigPublisher>,
) {
    task::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    println!("[mqtt] connected to broker");
                    if let Err(e) = client.subscribe("#", QoS::AtLeastOnce).await {
                        eprintln!("[mqtt] subscribe failed: {e:?}");
                    }
                    publisher.republish_all_configs().await;
                }
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    handler.handle_message(&p.topic, &p.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("[mqtt] erreur: {e:?}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

/// Timers de flush périodiques, indépendants des seuils de taille
pub fn spawn_flush_timers(handler: Arc<MessageHandler>) {
    task::spawn(async move {
        let mut measurements = tokio::time::interval(Duration::from_millis(MEASUREMENT_FLUSH_MS));
        let mut statuses = tokio::time::interval(Duration::from_millis(STATUS_FLUSH_MS));
        loop {
            tokio::select! {
                _ = measurements.tick() => handler.flush_measurements().await,
                _ = statuses.tick() => handler.flush_statuses().await,
            }
        }
    });
}
