//! Server discovery: which media servers an account can reach, and over
//! which connection.

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::PlexError;
use crate::wire::{non_empty, parse_flag};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("no accessible media server for this account")]
    NoAccessibleServer,

    #[error("media server has no usable connection")]
    NoConnection,
}

/// A server advertised by the identity service. Lives for one discovery call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateServer {
    pub name: String,
    pub machine_id: String,
    pub provides_server: bool,
    pub owned: bool,
    /// Share-scoped token, present when the server was shared with the account.
    pub access_token: Option<String>,
    pub connections: Vec<ServerConnection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    pub uri: String,
    pub local: bool,
    pub relay: bool,
}

impl CandidateServer {
    /// A media server the account owns, or one explicitly shared with it.
    pub fn is_accessible(&self) -> bool {
        self.provides_server && (self.owned || self.access_token.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedServer {
    pub server_url: String,
    pub access_token: String,
}

// ── Wire format ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ResourceList {
    #[serde(rename = "Device", default)]
    devices: Vec<DeviceWire>,
}

#[derive(Debug, Deserialize)]
struct DeviceWire {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "@clientIdentifier", default)]
    client_identifier: String,
    #[serde(rename = "@provides", default)]
    provides: String,
    #[serde(rename = "@owned", default)]
    owned: Option<String>,
    #[serde(rename = "@accessToken", default)]
    access_token: Option<String>,
    #[serde(rename = "Connection", default)]
    connections: Vec<ConnectionWire>,
}

#[derive(Debug, Deserialize)]
struct ConnectionWire {
    #[serde(rename = "@uri", default)]
    uri: String,
    #[serde(rename = "@local", default)]
    local: Option<String>,
    #[serde(rename = "@relay", default)]
    relay: Option<String>,
}

impl From<DeviceWire> for CandidateServer {
    fn from(device: DeviceWire) -> Self {
        Self {
            name: device.name,
            machine_id: device.client_identifier,
            provides_server: device.provides.split(',').any(|p| p.trim() == "server"),
            owned: device.owned.as_deref().is_some_and(parse_flag),
            access_token: non_empty(device.access_token),
            connections: device
                .connections
                .into_iter()
                .map(|c| ServerConnection {
                    uri: c.uri.trim().to_string(),
                    local: c.local.as_deref().is_some_and(parse_flag),
                    relay: c.relay.as_deref().is_some_and(parse_flag),
                })
                .collect(),
        }
    }
}

/// Parse the identity service's resource listing into typed candidates.
/// Every advertised device is returned; filter with `is_accessible`.
pub fn parse_resources(xml: &str) -> Result<Vec<CandidateServer>, PlexError> {
    let list: ResourceList = quick_xml::de::from_str(xml)?;
    Ok(list.devices.into_iter().map(CandidateServer::from).collect())
}

/// Pick the server and connection a delegated login binds to.
///
/// With `target_machine_id` only that server qualifies, which is what ties a
/// delegated login to the administrator's server rather than any server the
/// account can see. Local connections win over everything else; otherwise
/// the first non-empty URI is used, which may be a relay.
///
/// `account_token` is only ever used for servers the account owns. A shared
/// server must be reached with its share-scoped token.
pub fn select_best_connection(
    candidates: &[CandidateServer],
    target_machine_id: Option<&str>,
    account_token: &str,
) -> Result<SelectedServer, DiscoveryError> {
    let mut accessible = candidates.iter().filter(|c| c.is_accessible());
    let candidate = match target_machine_id {
        Some(target) => accessible.find(|c| c.machine_id == target),
        None => accessible.next(),
    }
    .ok_or(DiscoveryError::NoAccessibleServer)?;

    let usable = || candidate.connections.iter().filter(|c| !c.uri.is_empty());
    let connection = usable()
        .find(|c| c.local)
        .or_else(|| usable().next())
        .ok_or(DiscoveryError::NoConnection)?;

    if !connection.local {
        warn!(
            server = %candidate.name,
            relay = connection.relay,
            "No local connection, falling back to {}",
            connection.uri
        );
    }

    let access_token = if candidate.owned {
        candidate
            .access_token
            .clone()
            .unwrap_or_else(|| account_token.to_string())
    } else {
        candidate
            .access_token
            .clone()
            .ok_or(DiscoveryError::NoAccessibleServer)?
    };

    debug!(
        server = %candidate.name,
        machine_id = %candidate.machine_id,
        owned = candidate.owned,
        "Selected connection {}",
        connection.uri
    );

    Ok(SelectedServer {
        server_url: connection.uri.clone(),
        access_token,
    })
}
