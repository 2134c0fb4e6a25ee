//! Request and response bodies exchanged over the API.

pub mod balances;
pub mod directory;
pub mod documents;

pub use balances::BalanceResponse;
pub use directory::{
    ClientRequest, ClientResponse, ResourceRequest, ResourceResponse, UnitRequest, UnitResponse,
};
pub use documents::{
    DocumentItemRequest, DocumentItemResponse, ReceiptRequest, ReceiptResponse, ShipmentRequest,
    ShipmentResponse,
};
