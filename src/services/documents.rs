//! Pieces shared by receipt and shipment documents.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::sea_query::Query;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, EntityTrait};
use tracing::warn;

use super::balances::BalanceKey;
use super::directory::{resources_by_id, units_by_id};
use crate::dto::{DocumentItemRequest, DocumentItemResponse};
use crate::entities::{receipt_item, resource, shipment_item, unit};
use crate::errors::ServiceError;
use crate::repositories::SearchModel;

/// Item fields read back from either item table.
pub(crate) struct ItemRow {
    pub id: i32,
    pub resource_id: i32,
    pub unit_id: i32,
    pub quantity: Decimal,
}

impl From<receipt_item::Model> for ItemRow {
    fn from(item: receipt_item::Model) -> Self {
        Self {
            id: item.id,
            resource_id: item.resource_id,
            unit_id: item.unit_id,
            quantity: item.quantity,
        }
    }
}

impl From<shipment_item::Model> for ItemRow {
    fn from(item: shipment_item::Model) -> Self {
        Self {
            id: item.id,
            resource_id: item.resource_id,
            unit_id: item.unit_id,
            quantity: item.quantity,
        }
    }
}

pub(crate) fn keys_of(items: &[ItemRow]) -> BTreeSet<BalanceKey> {
    items
        .iter()
        .map(|item| (item.resource_id, item.unit_id))
        .collect()
}

pub(crate) fn requested_keys(items: &[DocumentItemRequest]) -> BTreeSet<BalanceKey> {
    items
        .iter()
        .map(|item| (item.resource_id, item.unit_id))
        .collect()
}

/// Checks that every item points at an existing, active resource and unit.
/// Pairs listed in `kept` were already on the document and may reference
/// records archived since.
pub(crate) async fn check_item_references<C: ConnectionTrait>(
    conn: &C,
    items: &[DocumentItemRequest],
    kept: &BTreeSet<BalanceKey>,
) -> Result<(), ServiceError> {
    let resources = resources_by_id(conn, items.iter().map(|i| i.resource_id)).await?;
    let units = units_by_id(conn, items.iter().map(|i| i.unit_id)).await?;

    for item in items {
        let resource = resources.get(&item.resource_id).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Resource with ID {} does not exist",
                item.resource_id
            ))
        })?;
        let unit = units.get(&item.unit_id).ok_or_else(|| {
            ServiceError::ValidationError(format!("Unit with ID {} does not exist", item.unit_id))
        })?;

        if kept.contains(&(item.resource_id, item.unit_id)) {
            continue;
        }
        if resource.is_archived {
            warn!(resource_id = resource.id, "Item references archived resource");
            return Err(ServiceError::ValidationError(format!(
                "Resource '{}' is archived",
                resource.name
            )));
        }
        if unit.is_archived {
            warn!(unit_id = unit.id, "Item references archived unit");
            return Err(ServiceError::ValidationError(format!(
                "Unit '{}' is archived",
                unit.name
            )));
        }
    }
    Ok(())
}

/// Resource and unit names for a set of items.
pub(crate) struct ItemNames {
    resources: HashMap<i32, resource::Model>,
    units: HashMap<i32, unit::Model>,
}

impl ItemNames {
    pub async fn load<'a, C: ConnectionTrait>(
        conn: &C,
        items: impl Iterator<Item = &'a ItemRow> + Clone,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            resources: resources_by_id(conn, items.clone().map(|i| i.resource_id)).await?,
            units: units_by_id(conn, items.map(|i| i.unit_id)).await?,
        })
    }

    /// Items ordered by id with display names resolved.
    pub fn responses(&self, mut items: Vec<ItemRow>) -> Vec<DocumentItemResponse> {
        items.sort_by_key(|item| item.id);
        items
            .into_iter()
            .map(|item| DocumentItemResponse {
                id: item.id,
                resource_id: item.resource_id,
                resource_name: self
                    .resources
                    .get(&item.resource_id)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
                unit_id: item.unit_id,
                unit_name: self
                    .units
                    .get(&item.unit_id)
                    .map(|u| u.name.clone())
                    .unwrap_or_default(),
                quantity: item.quantity,
            })
            .collect()
    }
}

/// Item table columns used by the document list filters.
pub(crate) struct ItemColumns<C> {
    pub document_id: C,
    pub resource_id: C,
    pub unit_id: C,
}

/// Extracts `date_from`, `date_to`, `resource_id` and `unit_id` from the
/// search filters and turns them into a predicate on the document table.
pub(crate) fn document_filters<I, D>(
    search: &mut SearchModel,
    id: D,
    date: D,
    items: ItemColumns<I::Column>,
) -> Result<Condition, ServiceError>
where
    I: EntityTrait,
    D: ColumnTrait,
{
    let mut condition = Condition::all();

    if let Some(raw) = search.take_filter("date_from") {
        condition = condition.add(date.gte(parse_date("date_from", &raw)?));
    }
    if let Some(raw) = search.take_filter("date_to") {
        condition = condition.add(date.lte(parse_date("date_to", &raw)?));
    }

    for (key, column) in [("resource_id", items.resource_id), ("unit_id", items.unit_id)] {
        if let Some(raw) = search.take_filter(key) {
            let ids = parse_ids(key, &raw)?;
            condition = condition.add(
                id.in_subquery(
                    Query::select()
                        .column(items.document_id)
                        .from(I::default())
                        .and_where(column.is_in(ids))
                        .to_owned(),
                ),
            );
        }
    }

    Ok(condition)
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, ServiceError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ServiceError::ValidationError(format!(
            "Filter '{}' expects a date (YYYY-MM-DD), got '{}'",
            key, raw
        ))
    })
}

fn parse_ids(key: &str, raw: &str) -> Result<Vec<i32>, ServiceError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<i32>().map_err(|_| {
                ServiceError::ValidationError(format!(
                    "Filter '{}' expects integer ids, got '{}'",
                    key, raw
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(ServiceError::ValidationError(format!(
            "Filter '{}' has no value",
            key
        )));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::receipt_document;
    use assert_matches::assert_matches;

    fn receipt_item_columns() -> ItemColumns<receipt_item::Column> {
        ItemColumns {
            document_id: receipt_item::Column::DocumentId,
            resource_id: receipt_item::Column::ResourceId,
            unit_id: receipt_item::Column::UnitId,
        }
    }

    #[test]
    fn document_filters_are_removed_from_the_search() {
        let mut search = SearchModel::default()
            .filter("date_from", "2024-01-01")
            .filter("date_to", "2024-01-31")
            .filter("resource_id", "1,2")
            .filter("number", "R-1");

        document_filters::<receipt_item::Entity, _>(
            &mut search,
            receipt_document::Column::Id,
            receipt_document::Column::Date,
            receipt_item_columns(),
        )
        .unwrap();

        assert_eq!(search.filters.len(), 1);
        assert!(search.filters.contains_key("number"));
    }

    #[test]
    fn malformed_document_filters_are_rejected() {
        let mut search = SearchModel::default().filter("date_from", "yesterday");
        let result = document_filters::<receipt_item::Entity, _>(
            &mut search,
            receipt_document::Column::Id,
            receipt_document::Column::Date,
            receipt_item_columns(),
        );
        assert_matches!(result, Err(ServiceError::ValidationError(_)));

        let mut search = SearchModel::default().filter("unit_id", "kg");
        let result = document_filters::<receipt_item::Entity, _>(
            &mut search,
            receipt_document::Column::Id,
            receipt_document::Column::Date,
            receipt_item_columns(),
        );
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }
}
