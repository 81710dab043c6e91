//! Discovery of a classifier library that becomes available at some point after startup.
//!
//! A library announces itself in [`Bindings`] in one of three shapes:
//! - a constructor,
//! - a module factory, an async function resolving to a [`Module`],
//! - a [`Module`] object exposing a constructor.
//!
//! [`probe`] inspects the bindings once and reports what it found as a [`Capability`]. The
//! [`Locator`] repeats the probe on a fixed interval until a classifier can be constructed, the
//! attempts are used up or the deadline passes.
use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::{
    sync::RwLock,
    time::{interval, timeout_at, Instant, MissedTickBehavior},
};

use crate::classifier::{Classifier, ClassifierError};

/// Builds a classifier handle.
pub type Constructor =
    Arc<dyn Fn() -> Result<Box<dyn Classifier>, ClassifierError> + Send + Sync>;

/// Loads a library module, which may take a while.
pub type ModuleFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Module, ClassifierError>> + Send + Sync>;

/// Loaded library module.
#[derive(Clone, Default)]
pub struct Module {
    pub constructor: Option<Constructor>,
}

impl Module {
    pub fn with_constructor(constructor: Constructor) -> Self {
        Self {
            constructor: Some(constructor),
        }
    }
}

/// The module binding holds either a factory or an already loaded module.
#[derive(Clone)]
pub enum ModuleBinding {
    Factory(ModuleFactory),
    Object(Module),
}

/// Registry a classifier library exposes itself through.
#[derive(Default)]
pub struct Bindings {
    constructor: RwLock<Option<Constructor>>,
    module: RwLock<Option<ModuleBinding>>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn expose_constructor(&self, constructor: Constructor) {
        *self.constructor.write().await = Some(constructor);
    }

    pub async fn expose_factory(&self, factory: ModuleFactory) {
        *self.module.write().await = Some(ModuleBinding::Factory(factory));
    }

    pub async fn expose_module(&self, module: Module) {
        *self.module.write().await = Some(ModuleBinding::Object(module));
    }

    pub async fn clear(&self) {
        *self.constructor.write().await = None;
        *self.module.write().await = None;
    }
}

/// Result of a single probe of the bindings.
#[derive(Clone)]
pub enum Capability {
    NotFound,
    SyncCtor(Constructor),
    AsyncFactory(ModuleFactory),
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::NotFound => write!(f, "NotFound"),
            Capability::SyncCtor(_) => write!(f, "SyncCtor"),
            Capability::AsyncFactory(_) => write!(f, "AsyncFactory"),
        }
    }
}

/// Inspect the bindings in order: constructor, module factory, module object.
pub async fn probe(bindings: &Bindings) -> Capability {
    if let Some(constructor) = bindings.constructor.read().await.as_ref() {
        return Capability::SyncCtor(Arc::clone(constructor));
    }
    match bindings.module.read().await.as_ref() {
        Some(ModuleBinding::Factory(factory)) => Capability::AsyncFactory(Arc::clone(factory)),
        Some(ModuleBinding::Object(Module {
            constructor: Some(constructor),
        })) => Capability::SyncCtor(Arc::clone(constructor)),
        _ => Capability::NotFound,
    }
}

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub retry_interval: Duration,
    pub max_attempts: u32,
    /// Overall deadline. Defaults to `retry_interval * max_attempts`.
    pub deadline: Option<Duration>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
            max_attempts: 50,
            deadline: None,
        }
    }
}

impl LocatorConfig {
    fn deadline(&self) -> Duration {
        self.deadline
            .unwrap_or_else(|| self.retry_interval * self.max_attempts)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error("classifier library not found after {attempts} attempts")]
    NotFound { attempts: u32 },
    #[error("classifier module failed to load: {0}")]
    Factory(#[source] ClassifierError),
    #[error("failed to construct classifier: {0}")]
    Construct(#[source] ClassifierError),
}

pub struct Locator {
    bindings: Arc<Bindings>,
    config: LocatorConfig,
}

impl Locator {
    pub fn new(bindings: Arc<Bindings>, config: LocatorConfig) -> Self {
        Self { bindings, config }
    }

    /// Poll the bindings until a classifier can be constructed.
    pub async fn locate(&self) -> Result<Box<dyn Classifier>, LocatorError> {
        let deadline = Instant::now() + self.config.deadline();
        let mut ticker = interval(self.config.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Module resolved by a factory, kept so the same factory is not invoked twice
        let mut resolved: Option<(ModuleFactory, Module)> = None;
        let mut attempts = 0;

        while attempts < self.config.max_attempts {
            ticker.tick().await;
            if Instant::now() > deadline {
                break;
            }
            attempts += 1;

            let constructor = match probe(&self.bindings).await {
                Capability::NotFound => None,
                Capability::SyncCtor(constructor) => Some(constructor),
                Capability::AsyncFactory(factory) => {
                    let module = match &resolved {
                        Some((known, module)) if Arc::ptr_eq(known, &factory) => module.clone(),
                        _ => {
                            log::debug!("Loading classifier module");
                            match timeout_at(deadline, factory()).await {
                                Err(_elapsed) => {
                                    log::warn!("Classifier module did not load before deadline");
                                    break;
                                }
                                Ok(module) => {
                                    let module = module.map_err(LocatorError::Factory)?;
                                    resolved = Some((factory, module.clone()));
                                    module
                                }
                            }
                        }
                    };
                    module.constructor
                }
            };

            match constructor {
                Some(constructor) => {
                    log::info!("Classifier library found after {attempts} attempt(s)");
                    return constructor().map_err(LocatorError::Construct);
                }
                None => log::debug!(
                    "Classifier library not available yet ({attempts}/{})",
                    self.config.max_attempts
                ),
            }
        }

        Err(LocatorError::NotFound { attempts })
    }
}
