use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::entities::{client, resource, unit};

/// Body for creating or fully replacing a client.
#[derive(Debug, Clone, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 512))]
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Validate, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UnitRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientResponse {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<client::Model> for ClientResponse {
    fn from(model: client::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            address: model.address,
            is_archived: model.is_archived,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub id: i32,
    pub name: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<resource::Model> for ResourceResponse {
    fn from(model: resource::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            is_archived: model.is_archived,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResponse {
    pub id: i32,
    pub name: String,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<unit::Model> for UnitResponse {
    fn from(model: unit::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            is_archived: model.is_archived,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}
