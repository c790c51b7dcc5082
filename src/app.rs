// =============================================================================
// Application — the root value wiring every component together (spec.md §9
// Design Note: "a single root struct wires them together. No hidden
// singletons.")
// =============================================================================

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::auth::{constant_time_eq, AuthGate};
use crate::broadcaster::Broadcaster;
use crate::chat::Chat;
use crate::config::ServerConfig;
use crate::error::AuthError;
use crate::registry::SessionRegistry;
use crate::save_store::SaveStore;
use crate::scheduler::SessionScheduler;
use crate::session::Session;
use crate::user_store::{Role, UserStore};

/// Every long-lived component the ControlAPI needs, passed by reference
/// (`Arc`) rather than hidden behind process globals.
#[derive(Clone)]
pub struct Application {
    pub registry: Arc<SessionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub save_store: Arc<SaveStore>,
    pub users: Arc<UserStore>,
    pub auth: Arc<AuthGate>,
    pub chat: Arc<Chat>,
    /// The session backing the public, session-less `/market/data` endpoint
    /// and the `market_data` broadcast topic. Private bot/human sessions
    /// run their own independent price tape for trading and do not feed
    /// this topic (see `start_session`'s `publish_market` flag).
    pub reference_session_id: Uuid,
    /// Bearer key -> session id, for the bot-order path (spec.md §6 `401
    /// BadBotKey`).
    bot_keys: Arc<DashMap<String, Uuid>>,
    schedulers: Arc<Mutex<Vec<(Uuid, SessionScheduler)>>>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl Application {
    pub fn new(config: &ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new();
        let save_store = Arc::new(SaveStore::new());
        let users = Arc::new(UserStore::new());
        let auth = Arc::new(AuthGate::new(&config.jwt_secret, users.clone()));
        let chat = Arc::new(Chat::new(users.clone(), broadcaster.clone()));

        if let (Some(identifier), Some(password)) =
            (&config.admin_identifier, &config.admin_password)
        {
            users.seed(identifier, password, Role::Admin);
        }
        if let (Some(identifier), Some(password)) =
            (&config.tester_identifier, &config.tester_password)
        {
            users.seed(identifier, password, Role::Tester);
        }

        let mut app = Self {
            registry,
            broadcaster,
            save_store,
            users,
            auth,
            chat,
            reference_session_id: Uuid::nil(),
            bot_keys: Arc::new(DashMap::new()),
            schedulers: Arc::new(Mutex::new(Vec::new())),
            started_at: chrono::Utc::now(),
        };

        let reference_config = crate::session::Config::new(
            crate::session::MAX_STARTING_CAPITAL,
            crate::price_engine::RiskLevel::Moderate,
            crate::price_engine::Difficulty::Medium,
            crate::mode::Mode::Classic,
            0,
            false,
        );
        let reference_session = Session::new(
            Uuid::new_v4(),
            None,
            reference_config,
            chrono::Utc::now().date_naive(),
        );
        app.reference_session_id = reference_session.id;
        app.start_session_internal(reference_session, None, true)
            .expect("the reference session has no primary-slot owner");

        app
    }

    /// Register a fresh human or bot session and spawn its Clock Scheduler.
    /// Private sessions never feed the shared `market_data` topic.
    pub fn start_session(
        &self,
        session: Session,
        owner_user: Option<Uuid>,
    ) -> Result<Uuid, crate::error::SessionError> {
        self.start_session_internal(session, owner_user, false)
    }

    fn start_session_internal(
        &self,
        session: Session,
        owner_user: Option<Uuid>,
        publish_market: bool,
    ) -> Result<Uuid, crate::error::SessionError> {
        let id = session.id;
        self.registry.insert(session, owner_user)?;
        let handle = self.registry.get(id).expect("just inserted");
        let scheduler = SessionScheduler::spawn(handle, self.broadcaster.clone(), publish_market);
        self.schedulers.lock().push((id, scheduler));
        Ok(id)
    }

    /// Stop and forget a session's scheduler, then remove it from the
    /// registry (spec.md §4.4 "Deletion is idempotent").
    pub fn stop_session(&self, id: Uuid) {
        let mut schedulers = self.schedulers.lock();
        if let Some(pos) = schedulers.iter().position(|(sid, _)| *sid == id) {
            let (_, scheduler) = schedulers.remove(pos);
            scheduler.stop();
        }
        self.registry.remove(id);
    }

    /// Stop every running scheduler (spec.md §5 shutdown: "stops accepting
    /// new orders").
    pub fn stop_all_schedulers(&self) {
        for (_, scheduler) in self.schedulers.lock().drain(..) {
            scheduler.stop();
        }
    }

    /// New bot session seeded at the spec's bot starting cash (spec.md
    /// §4.4: "a fresh Session with a new id and a portfolio seeded at
    /// 100,000 units of cash"). Returns the session id and a bearer key for
    /// the `/bot/order` path.
    pub fn register_bot(&self) -> (Uuid, String) {
        let config = crate::session::Config::new(
            crate::session::BOT_STARTING_CAPITAL,
            crate::price_engine::RiskLevel::Moderate,
            crate::price_engine::Difficulty::Medium,
            crate::mode::Mode::Classic,
            0,
            false,
        );
        let bot_id = Uuid::new_v4();
        let session = Session::new(
            Uuid::new_v4(),
            Some(crate::session::SessionOwner::Bot(bot_id)),
            config,
            chrono::Utc::now().date_naive(),
        );
        let session_id = self
            .start_session(session, None)
            .expect("bot sessions have no primary-slot conflict");
        let key = Uuid::new_v4().to_string();
        self.bot_keys.insert(key.clone(), session_id);
        (session_id, key)
    }

    /// Linear, constant-time scan rather than the DashMap's own hashed
    /// lookup, so a bearer key's comparison against each stored key never
    /// leaks timing information about where (or whether) it diverges.
    pub fn resolve_bot_key(&self, key: &str) -> Result<Uuid, AuthError> {
        self.bot_keys
            .iter()
            .find(|entry| constant_time_eq(entry.key().as_bytes(), key.as_bytes()))
            .map(|entry| *entry.value())
            .ok_or(AuthError::BadBotKey)
    }
}

impl axum::extract::FromRef<Application> for Arc<AuthGate> {
    fn from_ref(app: &Application) -> Self {
        app.auth.clone()
    }
}
