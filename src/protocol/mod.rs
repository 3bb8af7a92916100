//! Native TCP wire protocol: packet ids, revision gates, framing.
//!
//! The protocol revision is a monotonic integer; the client advertises
//! [`CLIENT_REVISION`] in Hello and both sides honor the minimum of the
//! two. Optional packet fields appear only when the negotiated revision
//! reaches the gate that introduced them.

pub mod block;
pub mod client_info;
#[cfg(feature = "compression")]
pub mod compress;
pub mod io;
pub mod progress;
pub mod settings;

pub const DBMS_NAME: &str = "ClickHouse";
pub const CLIENT_NAME: &str = "chdriver";

pub const CLIENT_VERSION_MAJOR: u64 = 22;
pub const CLIENT_VERSION_MINOR: u64 = 8;
pub const CLIENT_VERSION_PATCH: u64 = 0;
pub const CLIENT_REVISION: u64 = 54453;

pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_SECURE_PORT: u16 = 9440;
pub const DEFAULT_DATABASE: &str = "default";

/// Rows per Data block on bulk insert; larger inputs are split.
pub const INSERT_BLOCK_SIZE: usize = 1_048_576;
/// Raw bytes per compressed frame on the write path.
pub const DEFAULT_COMPRESS_BLOCK_SIZE: usize = 1_048_576;

// Revision gates, oldest first.
pub const DBMS_MIN_REVISION_WITH_TEMPORARY_TABLES: u64 = 50264;
pub const DBMS_MIN_REVISION_WITH_TOTAL_ROWS_IN_PROGRESS: u64 = 51554;
pub const DBMS_MIN_REVISION_WITH_BLOCK_INFO: u64 = 51903;
pub const DBMS_MIN_REVISION_WITH_CLIENT_INFO: u64 = 54032;
pub const DBMS_MIN_REVISION_WITH_SERVER_TIMEZONE: u64 = 54058;
pub const DBMS_MIN_REVISION_WITH_QUOTA_KEY_IN_CLIENT_INFO: u64 = 54060;
pub const DBMS_MIN_REVISION_WITH_SERVER_DISPLAY_NAME: u64 = 54372;
pub const DBMS_MIN_REVISION_WITH_VERSION_PATCH: u64 = 54401;
pub const DBMS_MIN_REVISION_WITH_SERVER_LOGS: u64 = 54406;
pub const DBMS_MIN_REVISION_WITH_CLIENT_WRITE_INFO: u64 = 54420;
pub const DBMS_MIN_REVISION_WITH_SETTINGS_SERIALIZED_AS_STRINGS: u64 = 54429;
pub const DBMS_MIN_REVISION_WITH_INTERSERVER_SECRET: u64 = 54441;
pub const DBMS_MIN_REVISION_WITH_OPENTELEMETRY: u64 = 54442;
pub const DBMS_MIN_REVISION_WITH_DISTRIBUTED_DEPTH: u64 = 54448;
pub const DBMS_MIN_REVISION_WITH_INITIAL_QUERY_START_TIME: u64 = 54449;
pub const DBMS_MIN_REVISION_WITH_PARALLEL_REPLICAS: u64 = 54453;

/// Client → server packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPacket {
    Hello = 0,
    Query = 1,
    Data = 2,
    Cancel = 3,
    Ping = 4,
}

impl ClientPacket {
    pub fn code(self) -> u64 {
        self as u64
    }
}

/// Server → client packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPacket {
    Hello = 0,
    Data = 1,
    Exception = 2,
    Progress = 3,
    Pong = 4,
    EndOfStream = 5,
    ProfileInfo = 6,
    Totals = 7,
    Extremes = 8,
    TablesStatusResponse = 9,
    Log = 10,
    TableColumns = 11,
    PartUuids = 12,
    ReadTaskRequest = 13,
    ProfileEvents = 14,
}

impl ServerPacket {
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Hello,
            1 => Self::Data,
            2 => Self::Exception,
            3 => Self::Progress,
            4 => Self::Pong,
            5 => Self::EndOfStream,
            6 => Self::ProfileInfo,
            7 => Self::Totals,
            8 => Self::Extremes,
            9 => Self::TablesStatusResponse,
            10 => Self::Log,
            11 => Self::TableColumns,
            12 => Self::PartUuids,
            13 => Self::ReadTaskRequest,
            14 => Self::ProfileEvents,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hello => "Hello",
            Self::Data => "Data",
            Self::Exception => "Exception",
            Self::Progress => "Progress",
            Self::Pong => "Pong",
            Self::EndOfStream => "EndOfStream",
            Self::ProfileInfo => "ProfileInfo",
            Self::Totals => "Totals",
            Self::Extremes => "Extremes",
            Self::TablesStatusResponse => "TablesStatusResponse",
            Self::Log => "Log",
            Self::TableColumns => "TableColumns",
            Self::PartUuids => "PartUUIDs",
            Self::ReadTaskRequest => "ReadTaskRequest",
            Self::ProfileEvents => "ProfileEvents",
        }
    }
}

/// How far the server should drive a SELECT before replying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryProcessingStage {
    FetchColumns = 0,
    WithMergeableState = 1,
    Complete = 2,
}

/// Compression flag inside the Query packet.
pub const COMPRESSION_DISABLED: u64 = 0;
pub const COMPRESSION_ENABLED: u64 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_codes() {
        assert_eq!(ClientPacket::Ping.code(), 4);
        assert_eq!(ServerPacket::from_code(5), Some(ServerPacket::EndOfStream));
        assert_eq!(ServerPacket::from_code(14), Some(ServerPacket::ProfileEvents));
        assert_eq!(ServerPacket::from_code(99), None);
        assert_eq!(ServerPacket::Log.name(), "Log");
    }
}
