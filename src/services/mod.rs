//! Business logic between HTTP handlers and repositories.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

use crate::errors::ServiceError;
use crate::repositories::{Page, SearchModel};

pub mod balances;
pub mod clients;
pub mod directory;
mod documents;
pub mod receipts;
pub mod resources;
pub mod shipments;
pub mod units;

pub use balances::BalanceService;
pub use clients::ClientService;
pub use directory::{DirectoryRecord, DirectoryService};
pub use receipts::ReceiptService;
pub use resources::ResourceService;
pub use shipments::ShipmentService;
pub use units::UnitService;

/// CRUD pipeline for one kind of record: validate the request, map it to an
/// entity, persist through the repository and shape the response.
#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// Record name used in error messages.
    const LABEL: &'static str;

    type Create: DeserializeOwned + Validate + Send + 'static;
    type Update: DeserializeOwned + Validate + Send + 'static;
    type Response: Serialize + Send + 'static;

    async fn create(&self, input: Self::Create) -> Result<Self::Response, ServiceError>;

    async fn get_by_id(&self, id: i32) -> Result<Self::Response, ServiceError>;

    async fn query(&self, search: SearchModel) -> Result<Page<Self::Response>, ServiceError>;

    /// Replaces every mutable field of the record.
    async fn update(&self, id: i32, input: Self::Update) -> Result<Self::Response, ServiceError>;

    /// Soft deletes archivable records unless `hard` is set. Returns `false`
    /// when the record does not exist.
    async fn delete(&self, id: i32, hard: bool) -> Result<bool, ServiceError>;
}

#[async_trait]
pub trait ArchiveService: ModelService {
    async fn archive(&self, id: i32) -> Result<Self::Response, ServiceError>;

    async fn unarchive(&self, id: i32) -> Result<Self::Response, ServiceError>;
}
