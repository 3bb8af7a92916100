//! Date and time codecs.
//!
//! Date is days since 1970-01-01 as u16, Date32 widens that to i32.
//! DateTime is seconds since the epoch as u32; DateTime64 is an i64 tick
//! count scaled by `10^precision`. Timezone-parameterized columns decode
//! into that zone; otherwise the server session zone (or UTC) applies.
//! The timezone table is consulted only when a value is actually read.

use chrono::{Duration, NaiveDate, TimeZone};
use chrono_tz::Tz;
use tokio::io::{AsyncRead, AsyncWrite};

use super::mismatch;
use crate::error::{Error, Result};
use crate::protocol::block::ColumnCtx;
use crate::protocol::io::{BufferedWriter, InputStream};
use crate::types::TypeDesc;
use crate::value::Value;

pub(super) fn epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()
}

fn resolve_tz(param: Option<&str>, ctx: &ColumnCtx) -> Result<Tz> {
    match param {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| Error::Protocol(format!("unknown timezone {name:?} in column type"))),
        None => Ok(ctx.server_tz()?.unwrap_or(Tz::UTC)),
    }
}

/// Tick divisor and nanoseconds per tick. Sub-nanosecond precisions
/// cannot be represented and are rejected.
fn datetime64_scale(precision: u8) -> Result<(i64, u32)> {
    if precision > 9 {
        return Err(Error::Protocol(format!(
            "DateTime64 precision {precision} is not supported"
        )));
    }
    Ok((10i64.pow(precision as u32), 10u32.pow(9 - precision as u32)))
}

fn instant(tz: Tz, secs: i64, nanos: u32) -> Result<Value> {
    tz.timestamp_opt(secs, nanos)
        .single()
        .map(Value::DateTime)
        .ok_or_else(|| Error::Protocol(format!("timestamp {secs}.{nanos} is not representable")))
}

pub(super) async fn read<'s, R: AsyncRead + Unpin + Send>(
    input: &mut InputStream<'s, R>,
    ty: &TypeDesc,
    rows: usize,
    ctx: &ColumnCtx,
) -> Result<Vec<Value>> {
    let mut out = Vec::with_capacity(rows);
    match ty {
        TypeDesc::Date => {
            for _ in 0..rows {
                let days = input.read_u16().await?;
                out.push(Value::Date(epoch_date() + Duration::days(days as i64)));
            }
        }
        TypeDesc::Date32 => {
            for _ in 0..rows {
                let days = input.read_i32().await?;
                out.push(Value::Date(epoch_date() + Duration::days(days as i64)));
            }
        }
        TypeDesc::DateTime(tz_name) => {
            let tz = resolve_tz(tz_name.as_deref(), ctx)?;
            for _ in 0..rows {
                let secs = input.read_u32().await?;
                out.push(instant(tz, secs as i64, 0)?);
            }
        }
        TypeDesc::DateTime64(precision, tz_name) => {
            let tz = resolve_tz(tz_name.as_deref(), ctx)?;
            let (divisor, nanos_per_tick) = datetime64_scale(*precision)?;
            for _ in 0..rows {
                let ticks = input.read_i64().await?;
                let secs = ticks.div_euclid(divisor);
                let frac = ticks.rem_euclid(divisor) as u32;
                out.push(instant(tz, secs, frac * nanos_per_tick)?);
            }
        }
        _ => return Err(Error::Protocol(format!("not a temporal type: {ty:?}"))),
    }
    Ok(out)
}

pub(super) async fn write<W: AsyncWrite + Unpin>(
    w: &mut BufferedWriter<W>,
    ty: &TypeDesc,
    values: &[Value],
) -> Result<()> {
    match ty {
        TypeDesc::Date => {
            for value in values {
                let Value::Date(d) = value else {
                    return Err(mismatch("Date", value));
                };
                let days = (*d - epoch_date()).num_days();
                let days = u16::try_from(days).map_err(|_| {
                    Error::InvalidArgument(format!("date {d} is out of Date range"))
                })?;
                w.write_u16(days).await?;
            }
        }
        TypeDesc::Date32 => {
            for value in values {
                let Value::Date(d) = value else {
                    return Err(mismatch("Date32", value));
                };
                let days = (*d - epoch_date()).num_days();
                let days = i32::try_from(days).map_err(|_| {
                    Error::InvalidArgument(format!("date {d} is out of Date32 range"))
                })?;
                w.write_i32(days).await?;
            }
        }
        TypeDesc::DateTime(_) => {
            for value in values {
                let Value::DateTime(dt) = value else {
                    return Err(mismatch("DateTime", value));
                };
                let secs = u32::try_from(dt.timestamp()).map_err(|_| {
                    Error::InvalidArgument(format!("timestamp {dt} is out of DateTime range"))
                })?;
                w.write_u32(secs).await?;
            }
        }
        TypeDesc::DateTime64(precision, _) => {
            let (divisor, nanos_per_tick) = datetime64_scale(*precision)?;
            for value in values {
                let Value::DateTime(dt) = value else {
                    return Err(mismatch("DateTime64", value));
                };
                let ticks = dt.timestamp() * divisor
                    + (dt.timestamp_subsec_nanos() / nanos_per_tick) as i64;
                w.write_i64(ticks).await?;
            }
        }
        _ => return Err(Error::Protocol(format!("not a temporal type: {ty:?}"))),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testutil::assert_roundtrip;
    use super::*;

    #[tokio::test]
    async fn date_roundtrips() {
        assert_roundtrip(
            "Date",
            vec![
                Value::Date(epoch_date()),
                Value::Date(NaiveDate::from_ymd_opt(2020, 8, 8).unwrap()),
            ],
        )
        .await;
        assert_roundtrip(
            "Date32",
            vec![Value::Date(NaiveDate::from_ymd_opt(1925, 1, 1).unwrap())],
        )
        .await;
    }

    #[tokio::test]
    async fn datetime_utc_roundtrip() {
        let dt = Tz::UTC.with_ymd_and_hms(2020, 8, 8, 0, 0, 0).unwrap();
        assert_roundtrip("DateTime", vec![Value::DateTime(dt)]).await;
    }

    #[tokio::test]
    async fn datetime_zoned_roundtrips() {
        // Includes a half-hour-offset zone.
        for zone in ["Europe/Moscow", "Asia/Kolkata"] {
            let tz: Tz = zone.parse().unwrap();
            let dt = tz.with_ymd_and_hms(2021, 3, 14, 12, 30, 45).unwrap();
            assert_roundtrip(
                &format!("DateTime('{zone}')"),
                vec![Value::DateTime(dt)],
            )
            .await;
        }
    }

    #[tokio::test]
    async fn datetime64_precision_roundtrips() {
        let tz = Tz::UTC;
        let dt = tz
            .timestamp_opt(1_596_844_800, 123_000_000)
            .single()
            .unwrap();
        assert_roundtrip("DateTime64(3)", vec![Value::DateTime(dt)]).await;
        let dt_micro = tz.timestamp_opt(1_596_844_800, 123_456_000).single().unwrap();
        assert_roundtrip("DateTime64(6, 'UTC')", vec![Value::DateTime(dt_micro)]).await;
    }

    #[tokio::test]
    async fn cross_zone_equality_is_instant_based() {
        let utc = Tz::UTC.timestamp_opt(1_600_000_000, 0).single().unwrap();
        let msk: Tz = "Europe/Moscow".parse().unwrap();
        let moscow = msk.timestamp_opt(1_600_000_000, 0).single().unwrap();
        assert_eq!(utc, moscow);
    }
}
