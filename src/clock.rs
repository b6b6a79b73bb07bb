use std::sync::OnceLock;
use std::time::Duration;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

static LOCAL_OFFSET: OnceLock<UtcOffset> = OnceLock::new();

/// Capture the local UTC offset for [`now`].
///
/// `time` refuses to read the local offset once a process has more than one thread on
/// some unix targets, so binaries call this before starting the tokio runtime. Returns
/// the captured offset, or `None` when it could not be determined.
pub fn init_local_offset() -> Option<UtcOffset> {
    let offset = UtcOffset::current_local_offset().ok()?;
    Some(*LOCAL_OFFSET.get_or_init(|| offset))
}

/// Current wall-clock time in the local offset captured by [`init_local_offset`].
///
/// Without a captured offset this asks the platform directly and falls back to UTC.
pub fn now() -> OffsetDateTime {
    now_in(LOCAL_OFFSET.get().copied())
}

fn now_in(offset: Option<UtcOffset>) -> OffsetDateTime {
    match offset {
        Some(offset) => OffsetDateTime::now_utc().to_offset(offset),
        None => OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
    }
}

/// Format a timestamp as `YYYY-MM-DD HH:MM:SS`, the format used in logs and result records.
pub fn format_log_time(ts: OffsetDateTime) -> String {
    ts.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| String::from("1970-01-01 00:00:00"))
}

/// Parse a `YYYY-MM-DD HH:MM:SS` timestamp. The text carries no offset, so UTC is assumed.
pub fn parse_log_time(s: &str) -> Result<OffsetDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s,
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    )
    .map(PrimitiveDateTime::assume_utc)
}

/// Serde adapter storing timestamps in the log format.
pub mod log_time {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(ts: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_log_time(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_log_time(&raw).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use time::OffsetDateTime;

        pub fn serialize<S: Serializer>(
            ts: &Option<OffsetDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => super::serialize(ts, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] OffsetDateTime);

            Ok(Option::<Wrapper>::deserialize(d)?.map(|Wrapper(ts)| ts))
        }
    }
}

/// Wall-clock span between two instants, clamped to zero if `end` precedes `start`.
pub fn duration_between(start: OffsetDateTime, end: OffsetDateTime) -> Duration {
    let span = end - start;
    if span.is_negative() {
        Duration::ZERO
    } else {
        span.unsigned_abs()
    }
}
