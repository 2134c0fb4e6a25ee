//! Search descriptor shared by every list endpoint.
//!
//! A [`SearchRequest`] is what arrives over HTTP (query string or JSON body).
//! It is resolved against page limits into a [`SearchModel`], which the
//! repository turns into a single `AND`-composed predicate plus a stable sort.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{ColumnTrait, ColumnType, Condition, EntityTrait, IdenStatic, Iterable, Value};
use serde::{Deserialize, Serialize};

use super::Record;
use crate::errors::ServiceError;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(ServiceError::ValidationError(format!(
                "Unknown sort direction '{}', expected asc or desc",
                other
            ))),
        }
    }
}

impl From<SortDirection> for sea_orm::Order {
    fn from(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => sea_orm::Order::Asc,
            SortDirection::Desc => sea_orm::Order::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

impl FromStr for SortSpec {
    type Err = ServiceError;

    /// `name`, `name:asc`, `name:desc` or `-name`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(field) = s.strip_prefix('-') {
            return Ok(SortSpec::desc(field));
        }
        match s.split_once(':') {
            Some((field, direction)) => Ok(SortSpec {
                field: field.trim().to_string(),
                direction: direction.trim().parse()?,
            }),
            None => Ok(SortSpec::asc(s)),
        }
    }
}

/// Page bounds applied when resolving a request.
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    pub default_page_size: u64,
    pub max_page_size: u64,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }
}

/// Search parameters as supplied by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default, alias = "per_page")]
    pub page_size: Option<u64>,
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    #[serde(default)]
    pub archived: Option<bool>,
}

impl SearchRequest {
    /// Parses `search`, `sort`, `page`, `page_size`/`per_page`, `archived`
    /// and `filter[field]` query parameters. Anything else is rejected.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self, ServiceError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut request = SearchRequest::default();

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "search" | "q" => {
                    if !value.is_empty() {
                        request.search = Some(value.to_string());
                    }
                }
                "sort" => {
                    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
                        request.sort.push(part.parse()?);
                    }
                }
                "page" => request.page = Some(parse_number(key, value)?),
                "page_size" | "per_page" => request.page_size = Some(parse_number(key, value)?),
                "archived" => {
                    request.archived = Some(value.parse().map_err(|_| {
                        ServiceError::ValidationError(format!(
                            "archived must be true or false, got '{}'",
                            value
                        ))
                    })?)
                }
                _ => match key
                    .strip_prefix("filter[")
                    .and_then(|rest| rest.strip_suffix(']'))
                {
                    Some(field) if !field.is_empty() => {
                        request.filters.insert(field.to_string(), value.to_string());
                    }
                    _ => {
                        return Err(ServiceError::ValidationError(format!(
                            "Unknown query parameter '{}'",
                            key
                        )))
                    }
                },
            }
        }

        Ok(request)
    }

    pub fn resolve(self, limits: &SearchLimits) -> Result<SearchModel, ServiceError> {
        let page = self.page.unwrap_or(1);
        if page < 1 {
            return Err(ServiceError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }

        let page_size = self.page_size.unwrap_or(limits.default_page_size);
        if page_size < 1 || page_size > limits.max_page_size {
            return Err(ServiceError::ValidationError(format!(
                "page_size must be between 1 and {}",
                limits.max_page_size
            )));
        }

        let model = SearchModel {
            search: self.search.filter(|s| !s.trim().is_empty()),
            sort: self.sort,
            page,
            page_size,
            filters: self.filters,
            archived: self.archived,
        };
        model.offset()?;
        Ok(model)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, ServiceError> {
    value.parse().map_err(|_| {
        ServiceError::ValidationError(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))
    })
}

/// Resolved search: page bounds checked, fields not yet bound to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchModel {
    pub search: Option<String>,
    pub sort: Vec<SortSpec>,
    pub page: u64,
    pub page_size: u64,
    pub filters: BTreeMap<String, String>,
    pub archived: Option<bool>,
}

impl Default for SearchModel {
    fn default() -> Self {
        Self {
            search: None,
            sort: Vec::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            filters: BTreeMap::new(),
            archived: None,
        }
    }
}

impl SearchModel {
    pub fn paged(mut self, page: u64, page_size: u64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn sorted_by(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    /// Rows skipped before this page. Pages whose offset a database cannot
    /// address are validation errors.
    pub fn offset(&self) -> Result<u64, ServiceError> {
        self.page
            .saturating_sub(1)
            .checked_mul(self.page_size)
            .filter(|offset| i64::try_from(*offset).is_ok())
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("page {} is out of range", self.page))
            })
    }

    /// Removes a filter that is not a column of the searched entity, for
    /// callers that apply it themselves.
    pub fn take_filter(&mut self, field: &str) -> Option<String> {
        self.filters.remove(field)
    }

    /// Builds the composed predicate for `E`. Unknown columns and values that
    /// do not parse as the column's type are validation errors.
    pub fn condition<E: Record>(&self) -> Result<Condition, ServiceError> {
        let mut condition = Condition::all();

        if let Some(term) = &self.search {
            let columns = E::search_columns();
            if columns.is_empty() {
                return Err(ServiceError::ValidationError(format!(
                    "{} does not support free-text search",
                    E::LABEL
                )));
            }
            let pattern = format!("%{}%", escape_like(&term.trim().to_lowercase()));
            let any = columns.into_iter().fold(Condition::any(), |any, col| {
                any.add(
                    Expr::expr(Func::lower(col.into_expr()))
                        .like(LikeExpr::new(pattern.clone()).escape('\\')),
                )
            });
            condition = condition.add(any);
        }

        for (field, raw) in &self.filters {
            let column = column_named::<E>(field)?;
            let mut values = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| parse_value(column.def().get_column_type(), field, v))
                .collect::<Result<Vec<_>, _>>()?;

            condition = match values.len() {
                0 => {
                    return Err(ServiceError::ValidationError(format!(
                        "Filter '{}' has no value",
                        field
                    )))
                }
                1 => condition.add(column.eq(values.remove(0))),
                _ => condition.add(column.is_in(values)),
            };
        }

        if let Some(archived) = self.archived {
            let column = E::archived_column().ok_or_else(|| {
                ServiceError::ValidationError(format!("{} cannot be archived", E::LABEL))
            })?;
            condition = condition.add(column.eq(archived));
        }

        Ok(condition)
    }

    /// Sort columns for `E` in request order, without the id tie-break.
    pub fn order<E: Record>(&self) -> Result<Vec<(E::Column, sea_orm::Order)>, ServiceError> {
        self.sort
            .iter()
            .map(|spec| Ok((column_named::<E>(&spec.field)?, spec.direction.into())))
            .collect()
    }
}

/// Makes `%`, `_` and `\` match literally inside a `LIKE` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn column_named<E: EntityTrait>(field: &str) -> Result<E::Column, ServiceError> {
    E::Column::iter()
        .find(|col| col.as_str() == field)
        .ok_or_else(|| ServiceError::ValidationError(format!("Unknown field '{}'", field)))
}

fn parse_value(column_type: &ColumnType, field: &str, raw: &str) -> Result<Value, ServiceError> {
    let invalid = |kind: &str| {
        ServiceError::ValidationError(format!(
            "Filter '{}' expects {}, got '{}'",
            field, kind, raw
        ))
    };

    let value = match column_type {
        ColumnType::TinyInteger
        | ColumnType::SmallInteger
        | ColumnType::Integer
        | ColumnType::BigInteger => raw
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid("an integer"))?,
        ColumnType::Boolean => raw
            .parse::<bool>()
            .map(Value::from)
            .map_err(|_| invalid("true or false"))?,
        ColumnType::Decimal(_) | ColumnType::Money(_) => Decimal::from_str(raw)
            .map(Value::from)
            .map_err(|_| invalid("a decimal"))?,
        ColumnType::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(Value::from)
            .map_err(|_| invalid("a date (YYYY-MM-DD)"))?,
        ColumnType::Timestamp | ColumnType::TimestampWithTimeZone | ColumnType::DateTime => {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| Value::from(dt.with_timezone(&Utc)))
                .map_err(|_| invalid("an RFC 3339 timestamp"))?
        }
        _ => Value::from(raw.to_string()),
    };
    Ok(value)
}
