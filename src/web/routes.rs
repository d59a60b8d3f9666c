// [library] Axum web framework routing components
use axum::{
    extract::FromRef,                   // [library] State extraction trait
    routing::{get, post},               // [library] HTTP method routing builders
    Router,                             // [library] HTTP request router for URL pattern matching
};

// [business] Import application modules for dependency injection and routing
use crate::{
    config::Config,
    db::Database,
    oauth::{self, FlowEngine},
    registry::Registry,
    security::{KeyManager, TokenSigner},
    web::{admin, login_handler, register_handler},
};

// [business] Application state shared by every handler
// Built once at startup; every component holds its own handle to the same store
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub keys: KeyManager,
    pub engine: FlowEngine,
    pub registry: Registry,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let keys = KeyManager::new(db.clone(), config.keys);
        let signer = TokenSigner::new(db.clone(), keys.clone(), config.issuer.clone());
        let engine = FlowEngine::new(db.clone(), signer);
        let registry = Registry::new(db.clone(), keys.clone());
        Self {
            db,
            config,
            keys,
            engine,
            registry,
        }
    }
}

// [library] FromRef lets handlers extract only the component they need
impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.db.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for KeyManager {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.keys.clone()
    }
}

impl FromRef<AppState> for FlowEngine {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.engine.clone()
    }
}

impl FromRef<AppState> for Registry {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.registry.clone()
    }
}

// [business] Create the main HTTP application router
pub fn create_app_router(db: Database, config: Config) -> Router {
    let app_state = AppState::new(db, config);
    Router::new()
        // [business] Well-known discovery endpoints for token consumers
        .route("/.well-known/jwks.json", get(oauth::jwks_handler)) // [security] Public keys for JWT verification
        .route(
            "/.well-known/openid-configuration",
            get(oauth::discovery_handler),
        )
        // [security] Token exchange endpoint
        .route("/oauth2/token", post(oauth::token_handler))
        // [business] User accounts
        .route("/register", post(register_handler))
        .route("/login", post(login_handler))
        // [business] Client and resource server administration, guarded by ADMIN_API_KEY
        .route("/admin/clients", post(admin::create_client_handler))
        .route(
            "/admin/clients/:client_id",
            get(admin::get_client_handler)
                .patch(admin::update_client_handler)
                .delete(admin::delete_client_handler),
        )
        .route("/admin/apis", post(admin::create_resource_server_handler))
        .route(
            "/admin/apis/:audience",
            get(admin::get_resource_server_handler)
                .patch(admin::update_resource_server_handler)
                .delete(admin::delete_resource_server_handler),
        )
        .route("/admin/apis/:audience/rotate", post(admin::rotate_keys_handler))
        // [business] Health check for load balancers
        .route("/health", get(health_check))
        .with_state(app_state)
}

// [business] Health check endpoint for monitoring and load balancer probes
async fn health_check() -> &'static str {
    "OK"
}
