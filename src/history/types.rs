//! Historical query model and the time-series service's page shapes.

use crate::error::{ClientError, Result, TransportError};
use crate::types::validate_field;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Aggregation applied per period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrMethod {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggrMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggrMethod::Count => "count",
            AggrMethod::Sum => "sum",
            AggrMethod::Avg => "avg",
            AggrMethod::Min => "min",
            AggrMethod::Max => "max",
        }
    }
}

/// Time bucket for aggregation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggrPeriod {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl AggrPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            AggrPeriod::Year => "year",
            AggrPeriod::Month => "month",
            AggrPeriod::Day => "day",
            AggrPeriod::Hour => "hour",
            AggrPeriod::Minute => "minute",
            AggrPeriod::Second => "second",
        }
    }
}

/// History of one entity, optionally restricted to some attributes and a
/// time window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    /// Attributes to return (empty = all).
    #[serde(default)]
    pub attrs: Vec<String>,
    #[serde(default)]
    pub from_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub aggr_method: Option<AggrMethod>,
    #[serde(default)]
    pub aggr_period: Option<AggrPeriod>,
}

impl HistoryQuery {
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: None,
            attrs: Vec::new(),
            from_date: None,
            to_date: None,
            aggr_method: None,
            aggr_period: None,
        }
    }

    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_attrs(mut self, attrs: Vec<String>) -> Self {
        self.attrs = attrs;
        self
    }

    /// Restrict to `[from, to]`.
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    pub fn aggregated(mut self, method: AggrMethod, period: AggrPeriod) -> Self {
        self.aggr_method = Some(method);
        self.aggr_period = Some(period);
        self
    }

    /// Check entity fields and the time window.
    pub fn validate(&self) -> Result<()> {
        validate_field("entity id", &self.entity_id)?;
        if let Some(ref t) = self.entity_type {
            validate_field("entity type", t)?;
        }
        if let (Some(from), Some(to)) = (self.from_date, self.to_date) {
            if from > to {
                return Err(ClientError::Validation(format!(
                    "fromDate {} is after toDate {}",
                    from, to
                )));
            }
        }
        if self.aggr_period.is_some() && self.aggr_method.is_none() {
            return Err(ClientError::Validation(
                "aggrPeriod requires aggrMethod".to_string(),
            ));
        }
        Ok(())
    }
}

/// One timestamped row of attribute values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Timestamp as reported by the service.
    pub index: String,
    pub values: BTreeMap<String, Value>,
}

impl HistoryRecord {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, attr: impl Into<String>, value: Value) -> Self {
        self.values.insert(attr.into(), value);
        self
    }
}

/// One offset/limit window over a history query.
#[derive(Clone, Debug, PartialEq)]
pub struct PageRequest {
    pub query: HistoryQuery,
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// Query-string parameters in the order the service documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(ref t) = self.query.entity_type {
            params.push(("type", t.clone()));
        }
        if !self.query.attrs.is_empty() {
            params.push(("attrs", self.query.attrs.join(",")));
        }
        params.push(("offset", self.offset.to_string()));
        params.push(("limit", self.limit.to_string()));
        if let Some(from) = self.query.from_date {
            params.push(("fromDate", from.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(to) = self.query.to_date {
            params.push(("toDate", to.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(method) = self.query.aggr_method {
            params.push(("aggrMethod", method.as_str().to_string()));
        }
        if let Some(period) = self.query.aggr_period {
            params.push(("aggrPeriod", period.as_str().to_string()));
        }
        params
    }
}

/// What one page request returned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PageResponse {
    pub records: Vec<HistoryRecord>,
    /// Total number of records across all pages, if the service said.
    pub total_count: Option<usize>,
}

impl PageResponse {
    /// Convert the service's column layout into rows:
    ///
    /// ```text
    /// {"index": [t0, t1], "attributes": [{"attrName": "a", "values": [1, 2]}]}
    /// ```
    pub fn from_columns(
        body: &Value,
        total_count: Option<usize>,
    ) -> std::result::Result<Self, TransportError> {
        let invalid = |msg: &str| TransportError::InvalidResponse(msg.to_string());

        let index = body
            .get("index")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("history response without an index array"))?;

        let mut records: Vec<HistoryRecord> = index
            .iter()
            .map(|t| match t {
                Value::String(s) => HistoryRecord::new(s.clone()),
                other => HistoryRecord::new(other.to_string()),
            })
            .collect();

        let columns = match body.get("attributes") {
            None => &[][..],
            Some(Value::Array(columns)) => columns.as_slice(),
            Some(_) => return Err(invalid("history attributes is not an array")),
        };

        for column in columns {
            let name = column
                .get("attrName")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("history column without attrName"))?;
            let values = column
                .get("values")
                .and_then(Value::as_array)
                .ok_or_else(|| invalid("history column without values"))?;
            if values.len() != records.len() {
                return Err(TransportError::InvalidResponse(format!(
                    "column {:?} has {} values for {} timestamps",
                    name,
                    values.len(),
                    records.len()
                )));
            }
            for (record, value) in records.iter_mut().zip(values) {
                record.values.insert(name.to_string(), value.clone());
            }
        }

        Ok(Self {
            records,
            total_count,
        })
    }
}

/// A batch handed out by a cursor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Page {
    pub records: Vec<HistoryRecord>,
    /// No further records will be returned.
    pub done: bool,
}
