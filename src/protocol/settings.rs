//! Query settings serialization.
//!
//! Newer servers take every setting as `name, flags, string value`; older
//! ones need the binary encoding of each known setting and anything
//! unknown is skipped. Either way the list ends with an empty name.

use std::collections::HashMap;

use tokio::io::AsyncWrite;
use tracing::warn;

use super::io::BufferedWriter;
use crate::error::Result;

/// Binary encodings for the pre-string-serialization format.
#[derive(Debug, Clone, Copy)]
enum SettingKind {
    UInt64,
    Bool,
    String,
    Float,
}

fn setting_kind(name: &str) -> Option<SettingKind> {
    Some(match name {
        "min_compress_block_size"
        | "max_compress_block_size"
        | "max_block_size"
        | "max_insert_block_size"
        | "min_insert_block_size_rows"
        | "min_insert_block_size_bytes"
        | "max_threads"
        | "max_read_buffer_size"
        | "max_distributed_connections"
        | "max_query_size"
        | "interactive_delay"
        | "connect_timeout"
        | "receive_timeout"
        | "send_timeout"
        | "insert_quorum"
        | "priority" => SettingKind::UInt64,
        "extremes"
        | "use_uncompressed_cache"
        | "replace_running_query"
        | "skip_unavailable_shards"
        | "distributed_group_by_no_merge"
        | "compile"
        | "insert_deduplicate" => SettingKind::Bool,
        "totals_mode" | "network_compression_method" | "count_distinct_implementation" => {
            SettingKind::String
        }
        "totals_auto_threshold" => SettingKind::Float,
        _ => return None,
    })
}

/// Write a settings map in the format the negotiated revision supports,
/// terminated by an empty name.
pub async fn write_settings<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    settings: &HashMap<String, String>,
    as_strings: bool,
    important: bool,
) -> Result<()> {
    for (name, value) in settings {
        if as_strings {
            w.write_str(name).await?;
            w.write_u8(important as u8).await?;
            w.write_str(value).await?;
            continue;
        }
        // Old servers need the setting's binary type; unknown settings
        // cannot be encoded and are skipped.
        let Some(kind) = setting_kind(name) else {
            warn!(setting = %name, "unknown setting, skipping");
            continue;
        };
        w.write_str(name).await?;
        match kind {
            SettingKind::UInt64 => {
                let parsed = value.parse::<u64>().unwrap_or(0);
                w.write_varint(parsed).await?;
            }
            SettingKind::Bool => {
                let truthy = matches!(value.as_str(), "1" | "true" | "True" | "on");
                w.write_varint(truthy as u64).await?;
            }
            SettingKind::String | SettingKind::Float => {
                w.write_str(value).await?;
            }
        }
    }
    w.write_str("").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::io::{BufferedReader, InputStream};

    #[tokio::test]
    async fn stringly_settings_roundtrip() {
        let mut settings = HashMap::new();
        settings.insert("max_block_size".to_string(), "5000".to_string());

        let mut w = BufferedWriter::new(Vec::new());
        write_settings(&mut w, &settings, true, false).await.unwrap();
        w.flush().await.unwrap();
        let buf = w.into_inner();

        let mut reader = BufferedReader::new(buf.as_slice());
        let mut input = InputStream::plain(&mut reader);
        assert_eq!(input.read_str().await.unwrap(), "max_block_size");
        assert_eq!(input.read_u8().await.unwrap(), 0);
        assert_eq!(input.read_str().await.unwrap(), "5000");
        assert_eq!(input.read_str().await.unwrap(), "");
    }

    #[tokio::test]
    async fn typed_format_skips_unknown() {
        let mut settings = HashMap::new();
        settings.insert("no_such_setting".to_string(), "1".to_string());

        let mut w = BufferedWriter::new(Vec::new());
        write_settings(&mut w, &settings, false, false)
            .await
            .unwrap();
        w.flush().await.unwrap();
        let buf = w.into_inner();

        // Only the terminator survives.
        assert_eq!(buf, vec![0]);
    }
}
