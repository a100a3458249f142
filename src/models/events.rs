use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{ClientError, ClientResult};

/// One transaction record sent alongside a user query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl UsageEvent {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            event_type: None,
            weight: None,
            timestamp: None,
        }
    }
}

/// Transaction history belonging to one user
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvents {
    pub user_id: String,
    pub events: Vec<UsageEvent>,
}

/// Accepted shapes for a user recommendation call
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// Known users; the service scores them against their stored history
    Users(Vec<String>),
    /// Transactions of one unidentified user
    Anonymous(Vec<UsageEvent>),
    /// Transactions grouped by user
    PerUser(Vec<UserEvents>),
}

/// One `recommend` call worth of user input
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRequest {
    pub user_id: Option<String>,
    pub events: Vec<UsageEvent>,
}

/// Loose tabular transaction data, typically parsed from a file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Column that identifies the user a transaction belongs to
const USER_COLUMN: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireField {
    ItemId,
    Timestamp,
    EventType,
    Weight,
}

/// Table column → wire field
const FIELD_MAP: &[(&str, WireField)] = &[
    ("item", WireField::ItemId),
    ("time", WireField::Timestamp),
    ("event", WireField::EventType),
    ("weight", WireField::Weight),
];

impl UserInput {
    pub fn users<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UserInput::Users(ids.into_iter().map(Into::into).collect())
    }

    /// Group `(user, event)` rows by user, keeping first-occurrence order
    pub fn grouped(rows: impl IntoIterator<Item = (String, UsageEvent)>) -> Self {
        let mut groups: Vec<UserEvents> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (user_id, event) in rows {
            match positions.get(&user_id) {
                Some(&idx) => groups[idx].events.push(event),
                None => {
                    positions.insert(user_id.clone(), groups.len());
                    groups.push(UserEvents {
                        user_id,
                        events: vec![event],
                    });
                }
            }
        }

        UserInput::PerUser(groups)
    }

    /// Resolve a transaction table into a typed input
    ///
    /// A `user` column selects per-user grouping; without it the whole table
    /// belongs to one anonymous user. Columns outside the field map are
    /// ignored.
    pub fn from_table(table: &TransactionTable) -> ClientResult<Self> {
        let normalized: Vec<String> = table
            .columns
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();

        let user_idx = normalized.iter().position(|c| c == USER_COLUMN);

        let mut mapped: Vec<(usize, WireField)> = Vec::new();
        for (name, field) in FIELD_MAP {
            if let Some(idx) = normalized.iter().position(|c| c == name) {
                mapped.push((idx, *field));
            }
        }

        if !mapped.iter().any(|(_, f)| *f == WireField::ItemId) {
            return Err(ClientError::InvalidInput(
                "Transaction table has no item column".to_string(),
            ));
        }

        let mut rows = Vec::with_capacity(table.rows.len());
        for (line, row) in table.rows.iter().enumerate() {
            if row.len() != table.columns.len() {
                return Err(ClientError::InvalidInput(format!(
                    "Transaction row {} has {} values, expected {}",
                    line,
                    row.len(),
                    table.columns.len()
                )));
            }
            let event = event_from_row(row, &mapped, line)?;
            let user = user_idx.map(|idx| row[idx].trim().to_string());
            if user.as_deref() == Some("") {
                return Err(ClientError::InvalidInput(format!(
                    "Transaction row {} has no user",
                    line
                )));
            }
            rows.push((user, event));
        }

        match user_idx {
            Some(_) => Ok(UserInput::grouped(
                rows.into_iter()
                    .map(|(user, event)| (user.unwrap_or_default(), event)),
            )),
            None => Ok(UserInput::Anonymous(
                rows.into_iter().map(|(_, event)| event).collect(),
            )),
        }
    }

    /// One request per unique subject, in first-occurrence order
    pub fn into_requests(self) -> ClientResult<Vec<SubjectRequest>> {
        let requests: Vec<SubjectRequest> = match self {
            UserInput::Users(ids) => unique_in_order(ids)
                .into_iter()
                .map(|id| SubjectRequest {
                    user_id: Some(id),
                    events: Vec::new(),
                })
                .collect(),
            UserInput::Anonymous(events) if events.is_empty() => Vec::new(),
            UserInput::Anonymous(events) => vec![SubjectRequest {
                user_id: None,
                events,
            }],
            UserInput::PerUser(groups) => {
                let mut merged: Vec<SubjectRequest> = Vec::new();
                let mut positions: HashMap<String, usize> = HashMap::new();
                for group in groups {
                    match positions.get(&group.user_id) {
                        Some(&idx) => merged[idx].events.extend(group.events),
                        None => {
                            positions.insert(group.user_id.clone(), merged.len());
                            merged.push(SubjectRequest {
                                user_id: Some(group.user_id),
                                events: group.events,
                            });
                        }
                    }
                }
                merged
            }
        };

        if requests.is_empty() {
            return Err(ClientError::InvalidInput(
                "Either user ids or transaction data must be supplied".to_string(),
            ));
        }

        Ok(requests)
    }

    /// Whether results carry a subject column
    pub fn is_identified(&self) -> bool {
        !matches!(self, UserInput::Anonymous(_))
    }
}

fn event_from_row(
    row: &[String],
    mapped: &[(usize, WireField)],
    line: usize,
) -> ClientResult<UsageEvent> {
    let mut event = UsageEvent::new(String::new());

    for (idx, field) in mapped {
        let value = row[*idx].trim();
        if value.is_empty() {
            continue;
        }
        match field {
            WireField::ItemId => event.item_id = value.to_string(),
            WireField::Timestamp => event.timestamp = Some(value.to_string()),
            WireField::EventType => event.event_type = Some(value.to_string()),
            WireField::Weight => {
                let weight = value.parse::<f64>().map_err(|_| {
                    ClientError::InvalidInput(format!(
                        "Transaction row {} has a non-numeric weight: {}",
                        line, value
                    ))
                })?;
                event.weight = Some(weight);
            }
        }
    }

    if event.item_id.is_empty() {
        return Err(ClientError::InvalidInput(format!(
            "Transaction row {} has no item",
            line
        )));
    }

    Ok(event)
}

/// Drop repeated ids, keeping the first occurrence of each
pub(crate) fn unique_in_order(ids: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
