/**
 * PUBLISHER - Publication des configurations capteurs vers les modules
 *
 * RÔLE :
 * Le store garde les intervalles par clé composite "hardware:type", mais
 * le firmware configure son polling par composant physique. Avant
 * publication les clés sont repliées sur le préfixe hardware, puis le
 * JSON part retained sur {module}/sensors/config pour que le module le
 * retrouve à la reconnexion.
 *
 * FONCTIONNEMENT :
 * - publish_config : replie + publie la config d'un module (retained, QoS 1)
 * - republish_all_configs : rejoue toutes les configs actives (sur ConnAck)
 * - publish_reset / publish_enable : commandes ponctuelles (non retained)
 */

use crate::models::ModuleConfig;
use crate::repository::Repository;
use crate::topics::hardware_key;
use anyhow::Context;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Config d'un composant telle que le firmware la consomme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HardwareInterval {
    pub interval: u32,
}

/// Payload publié sur {module}/sensors/config
#[derive(Debug, Serialize)]
struct ModuleConfigOut {
    sensors: BTreeMap<String, HardwareInterval>,
}

/// Replie les clés composites sur leur préfixe hardware.
/// "scd41:co2" et "scd41:temperature" partagent le même polling : une
/// seule entrée "scd41" sort. Parcours en ordre lexical, la dernière clé
/// d'un même préfixe gagne. Les entrées sans intervalle sont ignorées.
pub fn collapse_to_hardware_config(config: &ModuleConfig) -> BTreeMap<String, HardwareInterval> {
    let mut sorted: Vec<_> = config.sensors.iter().collect();
    sorted.sort_by_key(|(key, _)| key.as_str());

    let mut out = BTreeMap::new();
    for (key, entry) in sorted {
        if let Some(interval) = entry.interval {
            out.insert(hardware_key(key).to_string(), HardwareInterval { interval });
        }
    }
    out
}

/// Publication MQTT sortante vers les modules
pub struct ConfigPublisher {
    client: AsyncClient,
    repo: Arc<dyn Repository>,
}

impl ConfigPublisher {
    pub fn new(client: AsyncClient, repo: Arc<dyn Repository>) -> Self {
        Self { client, repo }
    }

    /// Publie la config repliée d'un module, retained pour survivre aux
    /// reboots du module.
    pub async fn publish_config(
        &self,
        module_id: &str,
        config: &ModuleConfig,
    ) -> anyhow::Result<()> {
        let out = ModuleConfigOut {
            sensors: collapse_to_hardware_config(config),
        };
        let payload = serde_json::to_string(&out)?;
        let topic = format!("{module_id}/sensors/config");
        self.client
            .publish(&topic, QoS::AtLeastOnce, true, payload)
            .await
            .with_context(|| format!("publish config on {topic}"))?;
        println!(
            "[publisher] published config for {} ({} hardware)",
            module_id,
            out.sensors.len()
        );
        Ok(())
    }

    /// Rejoue toutes les configs actives. Appelé à chaque ConnAck : le
    /// broker peut avoir perdu les retained (redémarrage sans persistance).
    pub async fn republish_all_configs(&self) {
        let configs = match self.repo.get_enabled_sensor_configs_by_module().await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("[publisher] failed to load configs for republish: {e}");
                return;
            }
        };

        let mut published = 0;
        for (module_id, config) in &configs {
            match self.publish_config(module_id, config).await {
                Ok(()) => published += 1,
                Err(e) => eprintln!("[publisher] republish failed for {module_id}: {e:?}"),
            }
        }
        println!("[publisher] republished {published} module configs");
    }

    /// Demande au module de réinitialiser un capteur
    pub async fn publish_reset(&self, module_id: &str, sensor: &str) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&serde_json::json!({ "sensor": sensor }))?;
        self.client
            .publish(
                format!("{module_id}/sensors/reset"),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await
            .context("publish reset")?;
        Ok(())
    }

    /// Active/désactive un composant hardware côté firmware
    pub async fn publish_enable(
        &self,
        module_id: &str,
        hardware: &str,
        enabled: bool,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&serde_json::json!({
            "hardware": hardware,
            "enabled": enabled,
        }))?;
        self.client
            .publish(
                format!("{module_id}/sensors/enable"),
                QoS::AtLeastOnce,
                false,
                payload,
            )
            .await
            .context("publish enable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SensorConfigEntry;

    fn entry(interval: Option<u32>) -> SensorConfigEntry {
        SensorConfigEntry { interval, model: None }
    }

    #[test]
    fn test_collapse_composite_keys_to_hardware() {
        let mut config = ModuleConfig::default();
        config.sensors.insert("scd41:co2".into(), entry(Some(60)));
        config.sensors.insert("scd41:temperature".into(), entry(Some(60)));
        config.sensors.insert("sps30:pm25".into(), entry(Some(120)));

        let collapsed = collapse_to_hardware_config(&config);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed["scd41"], HardwareInterval { interval: 60 });
        assert_eq!(collapsed["sps30"], HardwareInterval { interval: 120 });
    }

    #[test]
    fn test_collapse_last_key_wins_within_hardware() {
        let mut config = ModuleConfig::default();
        config.sensors.insert("scd41:co2".into(), entry(Some(30)));
        config.sensors.insert("scd41:temperature".into(), entry(Some(90)));

        // Ordre lexical : temperature passe après co2
        let collapsed = collapse_to_hardware_config(&config);
        assert_eq!(collapsed["scd41"], HardwareInterval { interval: 90 });
    }

    #[test]
    fn test_collapse_skips_entries_without_interval() {
        let mut config = ModuleConfig::default();
        config.sensors.insert("dht22:humidity".into(), entry(None));
        config.sensors.insert("dht22:temperature".into(), entry(Some(60)));
        config.sensors.insert("mq7:co".into(), entry(None));

        let collapsed = collapse_to_hardware_config(&config);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed["dht22"], HardwareInterval { interval: 60 });
    }

    #[test]
    fn test_collapse_bare_keys_pass_through() {
        let mut config = ModuleConfig::default();
        config.sensors.insert("temperature".into(), entry(Some(45)));

        let collapsed = collapse_to_hardware_config(&config);
        assert_eq!(collapsed["temperature"], HardwareInterval { interval: 45 });
    }
}
