/**
 * SERRA KERNEL - Point d'entrée du serveur de télémétrie
 *
 * RÔLE : Orchestration de tous les modules : config, manifests, store,
 * ingestion MQTT, santé, API HTTP, temps réel.
 *
 * ARCHITECTURE : Event-driven via MQTT (souscription "#") + écritures
 * batch vers le store + API REST + fan-out WebSocket.
 * UTILITÉ : Point central de l'écosystème Serra, toute la télémétrie des
 * modules ESP32 passe par ici.
 */

mod broadcast;
mod config;
mod health;
mod http;
mod ingest;
mod models;
mod publisher;
mod registry;
mod repository;
mod topics;

use crate::broadcast::Broadcaster;
use crate::config::load_config;
use crate::health::HealthService;
use crate::http::AppState;
use crate::ingest::MessageHandler;
use crate::publisher::ConfigPublisher;
use crate::registry::ModuleRegistry;
use crate::repository::{MemoryRepository, Repository};

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok(); // Ok si .env n'existe pas

    let cfg = load_config().await;

    // Manifests des types de modules
    let manifests_dir = cfg.manifests_dir.clone().unwrap_or_else(|| "./manifests".into());
    let registry = match ModuleRegistry::load_from_dir(&manifests_dir).await {
        Ok(registry) => {
            println!("[kernel] loaded {} module manifests", registry.module_types().len());
            Arc::new(registry)
        }
        Err(e) => {
            eprintln!("[kernel] failed to load manifests: {e}");
            Arc::new(ModuleRegistry::new())
        }
    };

    // Store en mémoire + snapshot JSON de l'état des modules
    std::fs::create_dir_all("./data").unwrap_or_else(|e| {
        eprintln!("[kernel] warning: failed to create data dir: {e}");
    });
    let mut store = MemoryRepository::new();
    if let Some(path) = &cfg.snapshot_path {
        store = store.with_snapshot(path);
    }
    let store = Arc::new(store);
    if let Err(e) = store.load_snapshot().await {
        eprintln!("[kernel] failed to load snapshot: {e}");
    }
    if cfg.snapshot_path.is_some() {
        let store = store.clone();
        tokio::task::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = store.save_snapshot().await {
                    eprintln!("[kernel] snapshot save failed: {e}");
                }
            }
        });
    }
    let repo: Arc<dyn Repository> = store;

    // Client MQTT partagé entre le listener et le publisher
    let (mqtt_client, eventloop) = ingest::create_mqtt_client(&cfg);
    let publisher = Arc::new(ConfigPublisher::new(mqtt_client.clone(), repo.clone()));

    // Pipeline d'ingestion : handler + timers de flush + boucle MQTT
    let broadcaster = Broadcaster::new(256);
    let handler = Arc::new(MessageHandler::new(
        repo.clone(),
        registry.clone(),
        broadcaster.clone(),
    ));
    ingest::spawn_flush_timers(handler.clone());
    ingest::spawn_mqtt_listener(mqtt_client, eventloop, handler, publisher.clone());

    // Santé dérivée + sweep des trous de données
    let health = Arc::new(HealthService::new(repo.clone()));
    health::spawn_gap_sweep(health.clone());

    // fabrique l'état unique pour Axum
    let app_state = AppState {
        repo,
        registry,
        health,
        publisher,
        broadcaster,
    };

    // HTTP
    let app = http::build_router(app_state);

    let port = cfg.http_port.unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
