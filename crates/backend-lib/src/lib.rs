// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core backend functionality for the event room server: RSVP admission with
//! waitlist promotion, live event rooms and their notification fan-out.

pub mod admission;
pub mod chat;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod ledger;
pub mod locks;
pub mod metrics;
pub mod models;
pub mod notifier;
pub mod promoter;
pub mod rooms;
pub mod storage;
pub mod validation;
pub mod websocket;
pub mod ws_router;

use crate::admission::AdmissionController;
use crate::chat::ChatService;
use crate::config::{Settings, StorageKind};
use crate::gateway::NotificationGateway;
use crate::identity::{IdentityService, TokenIdentity, SWEEP_INTERVAL};
use crate::ledger::CapacityLedger;
use crate::notifier::{LogNotifier, Notifier};
use crate::promoter::WaitlistPromoter;
use crate::rooms::RoomRegistry;
use crate::storage::{FlatFileStorage, MemoryStorage, Storage};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Bearer credential resolution
    pub identity: Arc<dyn IdentityService>,
    pub ledger: Arc<CapacityLedger>,
    pub rooms: Arc<RoomRegistry>,
    pub gateway: Arc<NotificationGateway>,
    pub promoter: Arc<WaitlistPromoter>,
    pub admission: Arc<AdmissionController>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Wire the services together over the given collaborators
    pub fn new(
        settings: Settings,
        storage: Arc<dyn Storage>,
        identity: Arc<dyn IdentityService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let ledger = Arc::new(CapacityLedger::new(storage));
        let rooms = Arc::new(RoomRegistry::new());
        let gateway = Arc::new(NotificationGateway::new(Arc::clone(&rooms)));
        let promoter = Arc::new(WaitlistPromoter::new(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            notifier,
            settings.unlimited_promotion,
        ));
        let admission = Arc::new(AdmissionController::new(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            Arc::clone(&promoter),
        ));
        let chat = Arc::new(ChatService::new(
            Arc::clone(&ledger),
            Arc::clone(&gateway),
            settings.history_limit,
        ));

        Self {
            settings: Arc::new(settings),
            identity,
            ledger,
            rooms,
            gateway,
            promoter,
            admission,
            chat,
        }
    }

    /// Build the production state: storage backend per settings, in-process
    /// token identity with its sweeper, log-only notifier.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let storage: Arc<dyn Storage> = match settings.storage {
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
            StorageKind::FlatFile => Arc::new(FlatFileStorage::new(&settings.data_dir)?),
        };

        let identity = TokenIdentity::new(settings.token_ttl());
        identity.spawn_sweeper(SWEEP_INTERVAL);

        Ok(Self::new(
            settings,
            storage,
            Arc::new(identity),
            Arc::new(LogNotifier::new()),
        ))
    }
}
