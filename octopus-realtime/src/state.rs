//! Application state management

use std::sync::{Arc, Mutex, PoisonError};

use crate::{
    config::Config,
    error::Result,
    websocket::{
        Broadcaster, BundleStore, ClientRegistry, MessageMiddleware, MiddlewareChain,
        RoomCommands, StaleConnectionReaper,
    },
};

/// Application state shared across handlers
///
/// Every socket session reads the registry, bundle store and middleware
/// chain from here. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<ClientRegistry>,
    bundles: Arc<BundleStore>,
    broadcaster: Broadcaster,
    chain: MiddlewareChain,
    reaper: Arc<Mutex<Option<StaleConnectionReaper>>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.config.service.name)
            .field("connections", &self.registry.connected_count())
            .field("bundles", &self.bundles.len())
            .field("chain", &self.chain)
            .finish()
    }
}

impl AppState {
    /// Create state with the built-in room commands and no reaper
    ///
    /// Use [`AppStateBuilder`] to customize the chain or start the reaper.
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let chain = MiddlewareChain::default().with(RoomCommands::new(
            Arc::clone(&registry),
            broadcaster.clone(),
        ));

        Self {
            config: Arc::new(config),
            registry,
            bundles: Arc::new(BundleStore::new()),
            broadcaster,
            chain,
            reaper: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a new builder for AppState
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registry of connected clients
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Store of live connection bundles
    pub fn bundles(&self) -> &Arc<BundleStore> {
        &self.bundles
    }

    /// Broadcaster over the registry
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Middleware chain bound to each new connection
    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    /// Stop the stale connection reaper, if this state started one
    pub async fn shutdown_reaper(&self) {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }
    }
}

/// Builder for AppState
pub struct AppStateBuilder {
    config: Option<Config>,
    enable_tracing: bool,
    room_commands: bool,
    middleware: Vec<Arc<dyn MessageMiddleware>>,
}

impl AppStateBuilder {
    /// Create a new builder with sensible defaults
    ///
    /// By default:
    /// - Config will be loaded from `Config::default()` if not provided
    /// - Tracing will be auto-initialized if not already set up
    /// - The chain ends with the built-in room commands
    pub fn new() -> Self {
        Self {
            config: None,
            enable_tracing: true,
            room_commands: true,
            middleware: Vec::new(),
        }
    }

    /// Set the configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Append a middleware to the chain
    ///
    /// Custom middleware runs in the order added, before the room commands.
    pub fn middleware<M>(mut self, middleware: M) -> Self
    where
        M: MessageMiddleware + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Leave the built-in room commands out of the chain
    pub fn without_room_commands(mut self) -> Self {
        self.room_commands = false;
        self
    }

    /// Enable automatic tracing initialization (default: enabled)
    pub fn with_tracing(mut self) -> Self {
        self.enable_tracing = true;
        self
    }

    /// Disable automatic tracing initialization
    ///
    /// Use this if tracing is already configured before calling `build()`.
    pub fn without_tracing(mut self) -> Self {
        self.enable_tracing = false;
        self
    }

    /// Initialize tracing from the service log level
    ///
    /// Safe to call multiple times; subsequent calls are no-ops.
    fn init_tracing(config: &Config) {
        use std::sync::Once;
        static INIT: Once = Once::new();

        INIT.call_once(|| {
            if let Err(e) = crate::observability::init_tracing(config) {
                // Someone else installed a subscriber first
                tracing::debug!(error = %e, "Tracing already configured");
            }
        });
    }

    /// Build the AppState
    ///
    /// Starts the stale connection reaper when `registry.reaper_enabled`
    /// is set, so this must run inside a tokio runtime.
    pub async fn build(self) -> Result<AppState> {
        let config = self.config.unwrap_or_default();

        if self.enable_tracing {
            Self::init_tracing(&config);
        }

        let registry = Arc::new(ClientRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        let mut layers = self.middleware;
        if self.room_commands {
            layers.push(Arc::new(RoomCommands::new(
                Arc::clone(&registry),
                broadcaster.clone(),
            )));
        }
        let chain = MiddlewareChain::new(layers);

        let reaper = if config.registry.reaper_enabled {
            registry.spawn_reaper(
                config.registry.reap_interval(),
                config.registry.stale_after(),
            )
        } else {
            None
        };

        tracing::debug!(chain = ?chain, reaper = reaper.is_some(), "Application state built");

        Ok(AppState {
            config: Arc::new(config),
            registry,
            bundles: Arc::new(BundleStore::new()),
            broadcaster,
            chain,
            reaper: Arc::new(Mutex::new(reaper)),
        })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::from_fn;

    #[tokio::test]
    async fn test_state_builder_defaults() {
        let state = AppStateBuilder::new()
            .without_tracing()
            .build()
            .await
            .unwrap();

        assert_eq!(state.config().service.name, "octopus");
        assert_eq!(state.chain().len(), 1);
        assert!(state.registry().reaper_active());

        state.shutdown_reaper().await;
        assert!(!state.registry().reaper_active());
    }

    #[tokio::test]
    async fn test_custom_middleware_runs_before_room_commands() {
        let mut config = Config::default();
        config.registry.reaper_enabled = false;

        let state = AppState::builder()
            .config(config)
            .without_tracing()
            .middleware(from_fn("auth", |_ctx| Ok(())))
            .build()
            .await
            .unwrap();

        assert_eq!(state.chain().len(), 2);
        assert!(format!("{:?}", state.chain()).contains("auth"));
        assert!(!state.registry().reaper_active());
    }

    #[tokio::test]
    async fn test_without_room_commands() {
        let mut config = Config::default();
        config.registry.reaper_enabled = false;

        let state = AppState::builder()
            .config(config)
            .without_tracing()
            .without_room_commands()
            .build()
            .await
            .unwrap();

        assert!(state.chain().is_empty());
    }

    #[test]
    fn test_shared_broadcaster_uses_state_registry() {
        let state = AppState::default();
        assert!(Arc::ptr_eq(state.broadcaster().registry(), state.registry()));
    }
}
