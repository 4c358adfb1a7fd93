//! Shipyard retrieval port.

use shipyard_types::error::ShipyardError;
use shipyard_types::shipyard::Shipyard;

/// Provides the parsed shipyard of a project and the revision it came from.
pub trait ShipyardRetriever: Send + Sync {
    /// Load and validate the current shipyard, refreshing any cache.
    fn get_shipyard(
        &self,
        project: &str,
    ) -> impl std::future::Future<Output = Result<Shipyard, ShipyardError>> + Send;

    /// The last loaded shipyard, loading it if nothing is cached yet.
    fn get_cached_shipyard(
        &self,
        project: &str,
    ) -> impl std::future::Future<Output = Result<Shipyard, ShipyardError>> + Send;

    /// Revision id of the configuration currently deployed to `stage`.
    fn get_latest_commit_id(
        &self,
        project: &str,
        stage: &str,
    ) -> impl std::future::Future<Output = Result<String, ShipyardError>> + Send;
}
