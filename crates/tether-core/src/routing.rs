//! Route id to request/response type mapping.

use crate::envelope::{HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One row of the routing table.
///
/// Serialized as a `[routeId, request, response]` triple; type names are
/// trimmed on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(i32, String, String)", into = "(i32, String, String)")]
pub struct RouteEntry {
    pub route_id: i32,
    pub request_type: String,
    pub response_type: String,
}

impl RouteEntry {
    pub fn new(
        route_id: i32,
        request_type: impl Into<String>,
        response_type: impl Into<String>,
    ) -> Self {
        (route_id, request_type.into(), response_type.into()).into()
    }
}

impl From<(i32, String, String)> for RouteEntry {
    fn from((route_id, request_type, response_type): (i32, String, String)) -> Self {
        Self {
            route_id,
            request_type: request_type.trim().to_string(),
            response_type: response_type.trim().to_string(),
        }
    }
}

impl From<RouteEntry> for (i32, String, String) {
    fn from(entry: RouteEntry) -> Self {
        (entry.route_id, entry.request_type, entry.response_type)
    }
}

/// A resolved request/response type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route<'a> {
    pub request_type: &'a str,
    pub response_type: &'a str,
}

impl Route<'static> {
    /// The synthetic pair used by heartbeat frames.
    pub const HEARTBEAT: Route<'static> = Route {
        request_type: HEARTBEAT_REQUEST,
        response_type: HEARTBEAT_RESPONSE,
    };
}

/// Static routing table, consistent in both directions.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    by_id: HashMap<i32, RouteEntry>,
    by_request: HashMap<String, i32>,
}

impl RouteTable {
    /// Build a table, rejecting duplicate ids, duplicate request types,
    /// empty type names and the reserved route id 0.
    pub fn new(entries: impl IntoIterator<Item = RouteEntry>) -> Result<Self, ConfigError> {
        let mut table = Self::default();
        for entry in entries {
            if entry.route_id == 0 {
                return Err(ConfigError::ReservedRouteId(0));
            }
            if entry.request_type.is_empty() {
                return Err(ConfigError::MissingRequest {
                    route_id: entry.route_id,
                });
            }
            if entry.response_type.is_empty() {
                return Err(ConfigError::MissingResponse {
                    route_id: entry.route_id,
                });
            }
            if table.by_id.contains_key(&entry.route_id) {
                return Err(ConfigError::DuplicateRouteId(entry.route_id));
            }
            if table.by_request.contains_key(&entry.request_type) {
                return Err(ConfigError::DuplicateRequestType(entry.request_type));
            }
            table
                .by_request
                .insert(entry.request_type.clone(), entry.route_id);
            table.by_id.insert(entry.route_id, entry);
        }
        Ok(table)
    }

    /// Inbound lookup.
    pub fn route(&self, route_id: i32) -> Result<Route<'_>, ConfigError> {
        self.by_id
            .get(&route_id)
            .map(|entry| Route {
                request_type: &entry.request_type,
                response_type: &entry.response_type,
            })
            .ok_or(ConfigError::RouteNotFound(route_id))
    }

    /// Outbound lookup.
    pub fn route_id(&self, request_type: &str) -> Result<i32, ConfigError> {
        self.by_request
            .get(request_type)
            .copied()
            .ok_or_else(|| ConfigError::MessageNotRouted(request_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
