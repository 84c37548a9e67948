use crate::cli::CommandLineArgs;
use crate::error::FluxError;
use crate::query::QueryContext;
use crate::resource_manager::ResourceManager;
use crate::scenario::ScenarioRegistry;
use crate::store::FluxStore;

use std::sync::Arc;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: ResourceManager,

    /// Storage collaborator.
    pub store: Arc<dyn FluxStore>,

    /// Scenarios loaded at startup.
    pub registry: ScenarioRegistry,
}

impl AppState {
    /// Create and return an [AppState], loading the scenario registry from the store.
    pub async fn new(args: &CommandLineArgs, store: Arc<dyn FluxStore>) -> Result<Self, FluxError> {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = ResourceManager::new(args.memory_limit, task_limit);
        let registry = ScenarioRegistry::load(store.as_ref(), args.precision).await?;

        Ok(Self {
            args: args.clone(),
            resource_manager,
            store,
            registry,
        })
    }

    /// Returns a [QueryContext] borrowing this state.
    pub fn query_context(&self) -> QueryContext<'_> {
        QueryContext {
            store: self.store.as_ref(),
            resource_manager: &self.resource_manager,
            use_rayon: self.args.use_rayon,
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
