/**
 * TOPICS - Parsing des topics MQTT, classification et canonicalisation
 *
 * RÔLE : Fonctions pures du chemin chaud d'ingestion. Aucun effet de bord,
 * appelées pour chaque message entrant.
 *
 * FONCTIONNEMENT :
 * - parse_topic : découpe {module_id}/{category}/{sensor_type}, rejette
 *   les topics de test (home/, dev/, test-module)
 * - classify : assigne une catégorie par suffixe, du plus spécifique au
 *   plus générique (/system/config avant /system)
 * - canonical_sensor_type : normalise les noms de mesures propres à chaque
 *   hardware vers un type canonique unique (deux capteurs d'humidité
 *   rapportent tous les deux "humidity", le hardware_id garde la provenance)
 * - validate_value : borne [min, max] inclusive issue du manifest
 */

/// Topic décomposé : module_id/category/sensor_type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicParts {
    pub module_id: String,
    pub category: Option<String>,
    pub sensor_type: Option<String>,
    pub parts: Vec<String>,
}

/// Préfixes de modules de test à ignorer
const SKIP_MODULE_PREFIXES: [&str; 2] = ["home", "dev"];
/// Identifiants sentinelles à ignorer
const SKIP_MODULE_IDS: [&str; 1] = ["test-module"];

/// Catégories réservées qui ne sont jamais des hardware_id de mesure
const RESERVED_CATEGORIES: [&str; 4] = ["sensors", "system", "hardware", "logs"];

/// Parse un topic MQTT. Retourne None pour les topics trop courts ou
/// d'origine test/debug.
pub fn parse_topic(topic: &str) -> Option<TopicParts> {
    let parts: Vec<String> = topic.split('/').map(str::to_string).collect();
    if parts.len() < 2 {
        return None;
    }

    let module_id = parts[0].clone();

    if SKIP_MODULE_PREFIXES.iter().any(|p| module_id.starts_with(p))
        || SKIP_MODULE_IDS.contains(&module_id.as_str())
    {
        return None;
    }

    Some(TopicParts {
        module_id,
        category: parts.get(1).cloned(),
        sensor_type: parts.get(2).cloned(),
        parts,
    })
}

/// Catégorie d'un message entrant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    System,
    SystemConfig,
    SensorsStatus,
    SensorsConfig,
    HardwareConfig,
    Logs,
    Measurement,
    Unknown,
}

/// Vrai si le topic est au format mesure : {module}/{hardware}/{mesure}
/// Exemples : croissance/dht22/temperature, serre/bmp280/pressure
pub fn is_measurement_topic(parsed: &TopicParts, topic: &str) -> bool {
    parsed.parts.len() == 3
        && parsed
            .category
            .as_deref()
            .map(|c| !RESERVED_CATEGORIES.contains(&c))
            .unwrap_or(false)
        && !topic.contains("/status")
        && !topic.contains("/config")
}

/// Classifie un message par suffixe de topic, du plus spécifique au plus
/// générique. /system/config doit passer avant /system.
pub fn classify(topic: &str, parsed: &TopicParts) -> MessageCategory {
    if topic.ends_with("/system/config") {
        MessageCategory::SystemConfig
    } else if topic.ends_with("/system") {
        MessageCategory::System
    } else if topic.ends_with("/sensors/status") {
        MessageCategory::SensorsStatus
    } else if topic.ends_with("/sensors/config") {
        MessageCategory::SensorsConfig
    } else if topic.ends_with("/hardware/config") {
        MessageCategory::HardwareConfig
    } else if topic.ends_with("/logs") {
        MessageCategory::Logs
    } else if is_measurement_topic(parsed, topic) {
        MessageCategory::Measurement
    } else {
        MessageCategory::Unknown
    }
}

/// Mapping des noms de mesures hardware vers les types canoniques.
/// Plusieurs composants mesurent la même grandeur physique sous des noms
/// historiques différents; le stockage et l'affichage utilisent la clé
/// canonique, hardware_id conserve la source.
pub fn canonical_sensor_type<'a>(hardware_id: &str, measurement: &'a str) -> &'a str {
    match (hardware_id, measurement) {
        ("bmp280", "temperature") => "temperature",
        ("bmp280", "pressure") => "pressure",
        // Anciens noms : temp_sht / hum_sht, désormais canoniques
        ("sht40" | "sht31" | "dht22", "temperature") => "temperature",
        ("sht40" | "sht31" | "dht22", "humidity") => "humidity",
        ("sgp30", "eco2") => "eco2",
        ("sgp30", "tvoc") => "tvoc",
        ("sgp40", "voc") => "voc",
        ("sps30", "pm1") => "pm1",
        ("sps30", "pm25") => "pm25",
        ("sps30", "pm4") => "pm4",
        ("sps30", "pm10") => "pm10",
        ("mhz14a", "co2") => "co2",
        ("mq7", "co") => "co",
        // Hardware ou mesure inconnus : passthrough (compatibilité
        // ascendante, un nouveau capteur ne doit pas bloquer l'ingestion)
        _ => measurement,
    }
}

/// Mesure extraite d'un topic {module}/{hardware}/{mesure} + payload décimal
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMeasurement {
    pub module_id: String,
    pub sensor_type: String,
    pub hardware_id: String,
    pub value: f64,
}

/// Parse une mesure depuis le topic décomposé et le payload brut.
/// None si le format ne correspond pas ou si le payload n'est pas numérique.
pub fn parse_measurement(parsed: &TopicParts, payload: &str) -> Option<ParsedMeasurement> {
    if parsed.parts.len() != 3 {
        return None;
    }

    let hardware_id = parsed.parts[1].clone();
    let measurement = &parsed.parts[2];
    let sensor_type = canonical_sensor_type(&hardware_id, measurement).to_string();

    let value: f64 = payload.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(ParsedMeasurement {
        module_id: parsed.module_id.clone(),
        sensor_type,
        hardware_id,
        value,
    })
}

/// Plage de validation issue du manifest d'un type de module
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationRange {
    pub min: f64,
    pub max: f64,
}

/// Résultat de validation d'une valeur de capteur
#[derive(Debug, Clone, PartialEq)]
pub enum ValueCheck {
    /// Valide; la plage consultée si le type est connu
    Valid(Option<ValidationRange>),
    /// Hors plage, la mesure est rejetée (jamais bufferisée)
    OutOfRange(ValidationRange),
}

impl ValueCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValueCheck::Valid(_))
    }
}

/// Valide une valeur contre la plage du manifest. Type inconnu = valide
/// (fail-open : un nouveau type de capteur ne doit pas bloquer l'ingestion).
pub fn validate_value<F>(sensor_type: &str, value: f64, get_range: F) -> ValueCheck
where
    F: Fn(&str) -> Option<ValidationRange>,
{
    match get_range(sensor_type) {
        None => ValueCheck::Valid(None),
        Some(range) => {
            if value < range.min || value > range.max {
                ValueCheck::OutOfRange(range)
            } else {
                ValueCheck::Valid(Some(range))
            }
        }
    }
}

/// Extrait la clé hardware d'un type de capteur composite.
/// "scd41:co2" -> "scd41" ; clé nue -> la clé entière.
pub fn hardware_key(sensor_type: &str) -> &str {
    sensor_type.split(':').next().unwrap_or(sensor_type)
}

/// Résout une clé composite en (hardware_id optionnel, type de capteur nu).
/// "scd41:co2" -> (Some("scd41"), "co2") ; "temperature" -> (None, "temperature")
pub fn split_composite(sensor_type: &str) -> (Option<&str>, &str) {
    match sensor_type.split_once(':') {
        Some((hw, bare)) => (Some(hw), bare),
        None => (None, sensor_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(topic: &str) -> TopicParts {
        parse_topic(topic).expect("topic should parse")
    }

    #[test]
    fn test_parse_topic_simple() {
        let p = parts("croissance/system");
        assert_eq!(p.module_id, "croissance");
        assert_eq!(p.category.as_deref(), Some("system"));
        assert_eq!(p.sensor_type, None);
        assert_eq!(p.parts, vec!["croissance", "system"]);
    }

    #[test]
    fn test_parse_topic_measurement() {
        let p = parts("croissance/dht22/temperature");
        assert_eq!(p.module_id, "croissance");
        assert_eq!(p.category.as_deref(), Some("dht22"));
        assert_eq!(p.sensor_type.as_deref(), Some("temperature"));
    }

    #[test]
    fn test_parse_topic_many_parts() {
        let p = parts("module/sensors/status/extra");
        assert_eq!(p.sensor_type.as_deref(), Some("status"));
        assert_eq!(p.parts.len(), 4);
    }

    #[test]
    fn test_parse_topic_rejected() {
        assert!(parse_topic("single").is_none());
        assert!(parse_topic("").is_none());
        assert!(parse_topic("home/x/y").is_none());
        assert!(parse_topic("dev/x").is_none());
        assert!(parse_topic("test-module/x").is_none());
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(
            classify("m/system/config", &parts("m/system/config")),
            MessageCategory::SystemConfig
        );
        assert_eq!(classify("m/system", &parts("m/system")), MessageCategory::System);
        assert_eq!(
            classify("m/sensors/status", &parts("m/sensors/status")),
            MessageCategory::SensorsStatus
        );
        assert_eq!(
            classify("m/sensors/config", &parts("m/sensors/config")),
            MessageCategory::SensorsConfig
        );
        assert_eq!(
            classify("m/hardware/config", &parts("m/hardware/config")),
            MessageCategory::HardwareConfig
        );
        assert_eq!(classify("m/logs", &parts("m/logs")), MessageCategory::Logs);
        assert_eq!(
            classify("m/bmp280/pressure", &parts("m/bmp280/pressure")),
            MessageCategory::Measurement
        );
    }

    #[test]
    fn test_classify_unknown() {
        // Catégorie réservée sans suffixe connu
        assert_eq!(classify("m/sensors", &parts("m/sensors")), MessageCategory::Unknown);
        // 4 segments : pas une mesure
        assert_eq!(
            classify("m/a/b/c", &parts("m/a/b/c")),
            MessageCategory::Unknown
        );
        // /status dans le topic exclut le format mesure
        assert_eq!(
            classify("m/foo/status", &parts("m/foo/status")),
            MessageCategory::Unknown
        );
    }

    #[test]
    fn test_canonical_mapping() {
        assert_eq!(canonical_sensor_type("sht40", "temperature"), "temperature");
        assert_eq!(canonical_sensor_type("sht40", "humidity"), "humidity");
        assert_eq!(canonical_sensor_type("bmp280", "pressure"), "pressure");
        assert_eq!(canonical_sensor_type("sps30", "pm25"), "pm25");
        // Hardware inconnu : passthrough
        assert_eq!(canonical_sensor_type("unknown_hw", "custom"), "custom");
        // Mesure inconnue pour un hardware connu : passthrough
        assert_eq!(canonical_sensor_type("bmp280", "altitude"), "altitude");
    }

    #[test]
    fn test_parse_measurement() {
        let p = parts("croissance/bmp280/pressure");
        let m = parse_measurement(&p, "1013.2").unwrap();
        assert_eq!(m.module_id, "croissance");
        assert_eq!(m.sensor_type, "pressure");
        assert_eq!(m.hardware_id, "bmp280");
        assert_eq!(m.value, 1013.2);
    }

    #[test]
    fn test_parse_measurement_non_numeric() {
        let p = parts("croissance/bmp280/pressure");
        assert!(parse_measurement(&p, "not-a-number").is_none());
        assert!(parse_measurement(&p, "NaN").is_none());
        assert!(parse_measurement(&p, "").is_none());
    }

    #[test]
    fn test_validate_value_boundaries() {
        let get_range = |t: &str| match t {
            "temperature" => Some(ValidationRange { min: -40.0, max: 85.0 }),
            _ => None,
        };

        // Bornes inclusives
        assert!(validate_value("temperature", -40.0, get_range).is_valid());
        assert!(validate_value("temperature", 85.0, get_range).is_valid());
        assert!(!validate_value("temperature", -40.01, get_range).is_valid());
        assert!(!validate_value("temperature", 85.01, get_range).is_valid());
    }

    #[test]
    fn test_validate_value_unknown_type() {
        let get_range = |_: &str| None;
        // Type inconnu : toujours valide quelle que soit la magnitude
        assert!(validate_value("unknown_sensor", 999_999.0, get_range).is_valid());
        assert_eq!(
            validate_value("unknown_sensor", 999_999.0, get_range),
            ValueCheck::Valid(None)
        );
    }

    #[test]
    fn test_validate_value_reports_range() {
        let range = ValidationRange { min: 0.0, max: 100.0 };
        let get_range = move |_: &str| Some(range);
        assert_eq!(
            validate_value("humidity", 120.0, get_range),
            ValueCheck::OutOfRange(range)
        );
    }

    #[test]
    fn test_hardware_key() {
        assert_eq!(hardware_key("scd41:co2"), "scd41");
        assert_eq!(hardware_key("temperature"), "temperature");
    }

    #[test]
    fn test_split_composite() {
        assert_eq!(split_composite("scd41:co2"), (Some("scd41"), "co2"));
        assert_eq!(split_composite("temperature"), (None, "temperature"));
    }
}
