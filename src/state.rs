use std::sync::Arc;

use crate::directory::UserDirectory;
use crate::signaling::registry::ConnectionRegistry;
use crate::signaling::rooms::RoomManager;
use crate::translation::connector::TranslationConnector;
use crate::translation::coordinator::TranslationCoordinator;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// user ↔ connection bindings
    pub registry: Arc<ConnectionRegistry>,
    /// Live two-party call rooms
    pub rooms: Arc<RoomManager>,
    /// Per-user translation settings, sessions, and per-room flags
    pub translation: Arc<TranslationCoordinator>,
    /// External lookup gating `register`
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(connector: Arc<dyn TranslationConnector>, directory: Arc<dyn UserDirectory>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let rooms = Arc::new(RoomManager::new());
        let translation = Arc::new(TranslationCoordinator::new(
            connector,
            registry.clone(),
            rooms.clone(),
        ));
        Self {
            registry,
            rooms,
            translation,
            directory,
        }
    }
}
