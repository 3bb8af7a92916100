//! Who is talking: the Hello exchange payloads.

use tokio::io::AsyncWrite;

use super::io::BufferedWriter;
use super::*;
use crate::error::Result;

/// What the server told us about itself during the handshake.
///
/// `revision` is the negotiated protocol revision (minimum of what the
/// server reported and what this client advertises); every later gate
/// check uses it.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub revision: u64,
    pub timezone: Option<String>,
    pub display_name: String,
}

impl ServerInfo {
    pub fn version_tuple(&self) -> (u64, u64, u64) {
        (self.version_major, self.version_minor, self.version_patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    NoQuery = 0,
    InitialQuery = 1,
    SecondaryQuery = 2,
}

/// TCP interface marker inside ClientInfo.
const INTERFACE_TCP: u8 = 1;

/// Client identification sent with every Query packet.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_name: String,
    pub query_kind: QueryKind,
    pub initial_user: String,
    pub initial_query_id: String,
    pub initial_address: String,
    pub os_user: String,
    pub client_hostname: String,
    pub quota_key: String,
}

impl ClientInfo {
    pub fn new(client_name: impl Into<String>) -> Self {
        let os_user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_default();
        let client_hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
        Self {
            client_name: client_name.into(),
            query_kind: QueryKind::InitialQuery,
            initial_user: String::new(),
            initial_query_id: String::new(),
            initial_address: "0.0.0.0:0".into(),
            os_user,
            client_hostname,
            quota_key: String::new(),
        }
    }

    /// Serialize for the given negotiated revision; fields whose gate is
    /// above it are omitted entirely.
    pub async fn write<W: AsyncWrite + Unpin>(
        &self,
        w: &mut BufferedWriter<W>,
        revision: u64,
    ) -> Result<()> {
        w.write_u8(self.query_kind as u8).await?;
        if self.query_kind == QueryKind::NoQuery {
            return Ok(());
        }

        w.write_str(&self.initial_user).await?;
        w.write_str(&self.initial_query_id).await?;
        w.write_str(&self.initial_address).await?;
        if revision >= DBMS_MIN_REVISION_WITH_INITIAL_QUERY_START_TIME {
            w.write_u64(0).await?;
        }

        w.write_u8(INTERFACE_TCP).await?;

        w.write_str(&self.os_user).await?;
        w.write_str(&self.client_hostname).await?;
        w.write_str(&self.client_name).await?;
        w.write_varint(CLIENT_VERSION_MAJOR).await?;
        w.write_varint(CLIENT_VERSION_MINOR).await?;
        w.write_varint(CLIENT_REVISION).await?;

        if revision >= DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO {
            w.write_str(&self.quota_key).await?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_DISTRIBUTED_DEPTH {
            w.write_varint(0).await?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_VERSION_PATCH {
            w.write_varint(CLIENT_VERSION_PATCH).await?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_OPENTELEMETRY {
            // No trace context attached.
            w.write_u8(0).await?;
        }
        if revision >= DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS {
            w.write_varint(0).await?; // collaborate_with_initiator
            w.write_varint(0).await?; // count_participating_replicas
            w.write_varint(0).await?; // number_of_current_replica
        }
        Ok(())
    }
}
