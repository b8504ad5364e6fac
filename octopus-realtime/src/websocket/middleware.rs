//! Message middleware and ordered chains
//!
//! A [`MessageMiddleware`] sees every inbound message on a connection
//! through its [`ConnectionContext`]. It can read the `message_*` locals,
//! set a response, or reject the message with a [`MiddlewareError`].
//!
//! ```rust,ignore
//! use octopus_realtime::websocket::{from_fn, MiddlewareChain};
//!
//! let chain = MiddlewareChain::default()
//!     .with(from_fn("uppercase", |ctx| {
//!         let data = ctx.envelope().map(|e| e.data.to_uppercase()).unwrap_or_default();
//!         ctx.set_response(data);
//!         Ok(())
//!     }));
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::ConnectionContext;
use crate::error::MiddlewareError;

/// Handler run for every inbound message on a connection
#[async_trait]
pub trait MessageMiddleware: Send + Sync {
    /// Inspect or act on the current message
    ///
    /// Returning an error stops the chain and sends a `middleware_error`
    /// reply instead of any response set so far.
    async fn handle(&self, ctx: &mut ConnectionContext) -> Result<(), MiddlewareError>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Middleware backed by a synchronous closure
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

/// Wrap a closure as a [`MessageMiddleware`]
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut ConnectionContext) -> Result<(), MiddlewareError> + Send + Sync,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

#[async_trait]
impl<F> MessageMiddleware for FnMiddleware<F>
where
    F: Fn(&mut ConnectionContext) -> Result<(), MiddlewareError> + Send + Sync,
{
    async fn handle(&self, ctx: &mut ConnectionContext) -> Result<(), MiddlewareError> {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered, immutable list of middleware
///
/// Cloning is cheap; every connection shares the same layers.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Arc<[Arc<dyn MessageMiddleware>]>,
}

impl MiddlewareChain {
    /// Chain running `layers` in order
    #[must_use]
    pub fn new(layers: Vec<Arc<dyn MessageMiddleware>>) -> Self {
        Self {
            layers: layers.into(),
        }
    }

    /// Copy of this chain with `layer` appended
    #[must_use]
    pub fn with(self, layer: impl MessageMiddleware + 'static) -> Self {
        let mut layers = self.layers.to_vec();
        layers.push(Arc::new(layer));
        Self::new(layers)
    }

    /// Number of layers
    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the chain has no layers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run every layer in order, stopping at the first error
    pub async fn run(&self, ctx: &mut ConnectionContext) -> Result<(), MiddlewareError> {
        for layer in self.layers.iter() {
            if let Err(e) = layer.handle(ctx).await {
                tracing::debug!(
                    connection_key = %ctx.key(),
                    middleware = layer.name(),
                    error = %e,
                    "Middleware rejected message"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.name()))
            .finish()
    }
}
