//! Application state wiring all services together.
//!
//! The core is generic over its ports; AppState pins it to the SQLite
//! stores, the filesystem shipyard retriever and the in-process event bus.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;

use shipyard_core::controller::ShipyardController;
use shipyard_core::dispatch::bus::EventBus;
use shipyard_core::dispatch::event_dispatcher::QueuedEventDispatcher;
use shipyard_core::dispatch::leadership::{DispatcherMode, WatchLeadership};
use shipyard_core::dispatch::sequence_dispatcher::QueueSequenceDispatcher;
use shipyard_core::hooks::{LoggingHook, SequenceHooks};
use shipyard_core::service::project::ProjectService;
use shipyard_core::service::sequence_execution::SequenceExecutionService;
use shipyard_core::service::sequence_state::SequenceStateService;
use shipyard_infra::shipyard::FileShipyardRetriever;
use shipyard_infra::sqlite::event::SqliteEventRepository;
use shipyard_infra::sqlite::event_queue::SqliteEventQueueRepository;
use shipyard_infra::sqlite::pool::{DatabasePool, database_url};
use shipyard_infra::sqlite::sequence_execution::SqliteSequenceExecutionRepository;
use shipyard_infra::sqlite::sequence_queue::SqliteSequenceQueueRepository;
use shipyard_types::config::ControllerConfig;

pub type ConcreteEventDispatcher = QueuedEventDispatcher<SqliteEventQueueRepository>;

pub type ConcreteSequenceDispatcher =
    QueueSequenceDispatcher<SqliteSequenceExecutionRepository, SqliteSequenceQueueRepository>;

pub type ConcreteController = ShipyardController<
    SqliteEventRepository,
    SqliteSequenceExecutionRepository,
    FileShipyardRetriever,
    ConcreteEventDispatcher,
    ConcreteSequenceDispatcher,
>;

pub type ConcreteProjectService = ProjectService<
    SqliteEventRepository,
    SqliteSequenceExecutionRepository,
    SqliteSequenceQueueRepository,
>;

/// Shared application state used by the HTTP handlers and background loops.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ConcreteController>,
    pub event_dispatcher: Arc<ConcreteEventDispatcher>,
    pub sequence_dispatcher: Arc<ConcreteSequenceDispatcher>,
    pub bus: EventBus,
    pub events: Arc<SqliteEventRepository>,
    pub execution_service: Arc<SequenceExecutionService<SqliteSequenceExecutionRepository>>,
    pub state_service: Arc<SequenceStateService<SqliteSequenceExecutionRepository>>,
    pub project_service: Arc<ConcreteProjectService>,
    /// Drives write leadership of the sequence dispatcher.
    pub leadership: Arc<watch::Sender<DispatcherMode>>,
    pub config: Arc<ControllerConfig>,
}

impl AppState {
    /// Open the database in `data_dir` and wire every service.
    pub async fn init(
        config: ControllerConfig,
        data_dir: &Path,
        shipyard_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;

        let events = Arc::new(SqliteEventRepository::new(db_pool.clone()));
        let executions = Arc::new(SqliteSequenceExecutionRepository::new(db_pool.clone()));
        let queue = Arc::new(SqliteSequenceQueueRepository::new(db_pool.clone()));
        let event_queue = Arc::new(SqliteEventQueueRepository::new(db_pool));
        let shipyards = Arc::new(FileShipyardRetriever::new(shipyard_dir));

        let bus = EventBus::new(config.event_bus_capacity);
        let event_dispatcher = Arc::new(
            QueuedEventDispatcher::new(bus.clone(), event_queue)
                .with_store_timeout(config.store_timeout()),
        );

        let (leadership, leadership_tx) =
            WatchLeadership::new(DispatcherMode::from_read_only(config.read_only));
        let sequence_dispatcher = Arc::new(
            QueueSequenceDispatcher::new(executions.clone(), queue.clone(), Arc::new(leadership))
                .with_store_timeout(config.store_timeout()),
        );

        let hooks = SequenceHooks::new().observe(Arc::new(LoggingHook));
        let controller = ShipyardController::new(
            events.clone(),
            executions.clone(),
            shipyards,
            event_dispatcher.clone(),
            sequence_dispatcher.clone(),
            hooks,
        )
        .with_store_timeout(config.store_timeout());

        Ok(Self {
            controller: Arc::new(controller),
            event_dispatcher,
            sequence_dispatcher,
            bus,
            execution_service: Arc::new(
                SequenceExecutionService::new(executions.clone())
                    .with_store_timeout(config.store_timeout()),
            ),
            state_service: Arc::new(
                SequenceStateService::new(executions.clone())
                    .with_store_timeout(config.store_timeout()),
            ),
            project_service: Arc::new(
                ProjectService::new(events.clone(), executions, queue)
                    .with_store_timeout(config.store_timeout()),
            ),
            events,
            leadership: Arc::new(leadership_tx),
            config: Arc::new(config),
        })
    }
}
