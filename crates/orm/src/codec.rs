//! Conversion between declared scalar types and engine wire values.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Timelike};
use ember_sql::{Error, RawValue, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::schema::DeclaredType;
use crate::value::Value;

/// 100ns ticks per second.
const TICKS_PER_SECOND: i64 = 10_000_000;
/// 100ns ticks per day.
const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;

fn epoch() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

fn mismatch(declared: DeclaredType, value: &Value, column: &str) -> Error {
    Error::TypeMismatch {
        column: column.to_string(),
        expected: format!("{declared:?}"),
        actual: value.type_name().to_string(),
    }
}

fn out_of_range(value: impl ToString, target: impl ToString) -> Error {
    Error::OutOfRange {
        value: value.to_string(),
        target: target.to_string(),
    }
}

/// Encodes a non-null value for a column of the declared type.
///
/// # Errors
///
/// Returns a validation error if the value has the wrong type or does not fit
/// the column's representation.
pub fn encode(declared: DeclaredType, value: Value, column: &str) -> Result<RawValue> {
    match declared {
        DeclaredType::Bool => match value {
            Value::Bool(b) => Ok(RawValue::Boolean(b)),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Int8 => integer(value, i64::from(i8::MIN), i64::from(i8::MAX), declared, column),
        DeclaredType::Int16 => {
            integer(value, i64::from(i16::MIN), i64::from(i16::MAX), declared, column)
        }
        DeclaredType::Int32 => {
            integer(value, i64::from(i32::MIN), i64::from(i32::MAX), declared, column)
        }
        DeclaredType::Int64 | DeclaredType::Enum => integer(value, i64::MIN, i64::MAX, declared, column),
        DeclaredType::UInt8 => integer(value, 0, i64::from(u8::MAX), declared, column),
        DeclaredType::UInt16 => integer(value, 0, i64::from(u16::MAX), declared, column),
        DeclaredType::UInt32 => integer(value, 0, i64::from(u32::MAX), declared, column),
        DeclaredType::UInt64 => integer(value, 0, i64::MAX, declared, column),
        DeclaredType::Float32 | DeclaredType::Float64 => float(value, declared, column),
        DeclaredType::Decimal { precision, scale } => {
            let decimal = match value {
                Value::Decimal(d) => d,
                Value::Int(i) => Decimal::from(i),
                Value::UInt(u) => Decimal::from(u),
                Value::Float(f) => Decimal::try_from(f).map_err(|_e| out_of_range(f, "decimal"))?,
                other => return Err(mismatch(declared, &other, column)),
            };
            encode_decimal(decimal, precision, scale, column).map(RawValue::Integer)
        }
        DeclaredType::Uuid => match value {
            Value::Uuid(u) => Ok(RawValue::Blob(u.as_bytes().to_vec())),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Date => match value {
            Value::Date(d) => Ok(RawValue::Integer((d - epoch()).num_days())),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Time => match value {
            Value::Time(t) => time_ticks(t).map(RawValue::Integer),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Timestamp(_) => match value {
            Value::Timestamp(ts) => Ok(RawValue::Integer(ts.timestamp_millis())),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Duration => match value {
            Value::Duration(d) => duration_ticks(d).map(RawValue::Integer),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Text => match value {
            Value::Text(s) => Ok(RawValue::Text(s)),
            other => Err(mismatch(declared, &other, column)),
        },
        DeclaredType::Blob => match value {
            Value::Blob(b) => Ok(RawValue::Blob(b)),
            other => Err(mismatch(declared, &other, column)),
        },
    }
}

fn integer(value: Value, min: i64, max: i64, declared: DeclaredType, column: &str) -> Result<RawValue> {
    let n = match value {
        Value::Int(i) => i,
        Value::UInt(u) => i64::try_from(u).map_err(|_e| out_of_range(u, format!("{declared:?}")))?,
        other => return Err(mismatch(declared, &other, column)),
    };
    if n < min || n > max {
        return Err(out_of_range(n, format!("{declared:?}")));
    }
    Ok(RawValue::Integer(n))
}

#[allow(clippy::cast_precision_loss, reason = "integers written to REAL columns widen to doubles")]
fn float(value: Value, declared: DeclaredType, column: &str) -> Result<RawValue> {
    match value {
        Value::Float(f) => Ok(RawValue::Real(f)),
        Value::Int(i) => Ok(RawValue::Real(i as f64)),
        Value::UInt(u) => Ok(RawValue::Real(u as f64)),
        other => Err(mismatch(declared, &other, column)),
    }
}

/// Scales a decimal to `value × 10^scale`, rounding half-to-even to `scale`
/// digits first. Fails if the result needs more than `precision` digits or
/// does not fit a signed 64-bit integer.
fn encode_decimal(value: Decimal, precision: u32, scale: u32, column: &str) -> Result<i64> {
    let overflow = || Error::DecimalOverflow {
        column: column.to_string(),
        value: value.to_string(),
        precision,
        scale,
    };

    let rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
    let widen = scale - rounded.scale().min(scale);
    let scaled = 10_i128
        .checked_pow(widen)
        .and_then(|factor| rounded.mantissa().checked_mul(factor))
        .ok_or_else(overflow)?;

    let limit = 10_i128.pow(precision);
    if scaled.abs() >= limit {
        return Err(overflow());
    }
    i64::try_from(scaled).map_err(|_e| overflow())
}

/// Leap-second times carry `nanosecond() >= 1_000_000_000` and have no tick
/// count inside the day.
fn time_ticks(time: NaiveTime) -> Result<i64> {
    let ticks = i64::from(time.num_seconds_from_midnight()) * TICKS_PER_SECOND
        + i64::from(time.nanosecond() / 100);
    if ticks >= TICKS_PER_DAY {
        return Err(out_of_range(time, "time of day"));
    }
    Ok(ticks)
}

fn duration_ticks(duration: TimeDelta) -> Result<i64> {
    let ticks = i128::from(duration.num_seconds()) * i128::from(TICKS_PER_SECOND)
        + i128::from(duration.subsec_nanos() / 100);
    i64::try_from(ticks).map_err(|_e| out_of_range(duration, "duration ticks"))
}

/// Decodes a value read from a column of the declared type.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the stored value does not match the declared type.
pub fn decode(declared: DeclaredType, raw: RawValue, column: &str) -> Result<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    match declared {
        DeclaredType::Bool => Ok(Value::Bool(raw.as_integer(column)? != 0)),
        DeclaredType::Int8
        | DeclaredType::Int16
        | DeclaredType::Int32
        | DeclaredType::Int64
        | DeclaredType::Enum => Ok(Value::Int(raw.as_integer(column)?)),
        DeclaredType::UInt8 | DeclaredType::UInt16 | DeclaredType::UInt32 | DeclaredType::UInt64 => {
            let n = raw.as_integer(column)?;
            u64::try_from(n)
                .map(Value::UInt)
                .map_err(|_e| Error::decode(column, format_args!("negative value {n} for unsigned column")))
        }
        DeclaredType::Float32 | DeclaredType::Float64 => Ok(Value::Float(raw.as_real(column)?)),
        DeclaredType::Decimal { scale, .. } => {
            let n = raw.as_integer(column)?;
            Decimal::try_new(n, scale).map(Value::Decimal).map_err(|e| Error::decode(column, e))
        }
        DeclaredType::Uuid => {
            let bytes = raw.into_blob(column)?;
            Uuid::from_slice(&bytes).map(Value::Uuid).map_err(|_e| {
                Error::decode(column, format_args!("expected 16 bytes, got {}", bytes.len()))
            })
        }
        DeclaredType::Date => {
            let days = raw.as_integer(column)?;
            TimeDelta::try_days(days)
                .and_then(|d| epoch().checked_add_signed(d))
                .map(Value::Date)
                .ok_or_else(|| Error::decode(column, format_args!("day count {days} out of range")))
        }
        DeclaredType::Time => {
            let ticks = raw.as_integer(column)?;
            decode_time(ticks)
                .map(Value::Time)
                .ok_or_else(|| Error::decode(column, format_args!("tick count {ticks} is not a time of day")))
        }
        DeclaredType::Timestamp(_) => {
            let millis = raw.as_integer(column)?;
            DateTime::from_timestamp_millis(millis)
                .map(Value::Timestamp)
                .ok_or_else(|| Error::decode(column, format_args!("timestamp {millis} out of range")))
        }
        DeclaredType::Duration => {
            let ticks = raw.as_integer(column)?;
            decode_duration(ticks)
                .map(Value::Duration)
                .ok_or_else(|| Error::decode(column, format_args!("duration {ticks} out of range")))
        }
        DeclaredType::Text => raw.into_text(column).map(Value::Text),
        DeclaredType::Blob => raw.into_blob(column).map(Value::Blob),
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "ticks are range-checked to one day, so both parts fit in u32"
)]
fn decode_time(ticks: i64) -> Option<NaiveTime> {
    if !(0..TICKS_PER_DAY).contains(&ticks) {
        return None;
    }
    let seconds = (ticks / TICKS_PER_SECOND) as u32;
    let nanos = (ticks % TICKS_PER_SECOND * 100) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
}

fn decode_duration(ticks: i64) -> Option<TimeDelta> {
    let seconds = ticks.div_euclid(TICKS_PER_SECOND);
    let nanos = ticks.rem_euclid(TICKS_PER_SECOND) * 100;
    TimeDelta::try_seconds(seconds).and_then(|s| s.checked_add(&TimeDelta::nanoseconds(nanos)))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDateTime, Utc};

    use super::*;

    const DEC: DeclaredType = DeclaredType::Decimal {
        precision: 18,
        scale: 4,
    };

    fn round_trip(declared: DeclaredType, value: Value) -> Value {
        let raw = encode(declared, value, "c").unwrap();
        decode(declared, raw, "c").unwrap()
    }

    #[test]
    fn integer_boundaries() {
        for (declared, min, max) in [
            (DeclaredType::Int8, i64::from(i8::MIN), i64::from(i8::MAX)),
            (DeclaredType::Int16, i64::from(i16::MIN), i64::from(i16::MAX)),
            (DeclaredType::Int32, i64::from(i32::MIN), i64::from(i32::MAX)),
            (DeclaredType::Int64, i64::MIN, i64::MAX),
        ] {
            for n in [min, 0, max] {
                assert_eq!(round_trip(declared, Value::Int(n)), Value::Int(n));
            }
        }
        let too_big = encode(DeclaredType::Int8, Value::Int(128), "c");
        assert!(matches!(too_big, Err(Error::OutOfRange { .. })));
        let negative = encode(DeclaredType::UInt32, Value::Int(-1), "c");
        assert!(matches!(negative, Err(Error::OutOfRange { .. })));
        let huge = encode(DeclaredType::UInt64, Value::UInt(u64::MAX), "c");
        assert!(matches!(huge, Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn floats() {
        for f in [f64::MIN, -1.5, 0.0, f64::MAX] {
            assert_eq!(round_trip(DeclaredType::Float64, Value::Float(f)), Value::Float(f));
        }
        let raw = encode(DeclaredType::Float64, Value::Int(3), "c").unwrap();
        assert_eq!(raw, RawValue::Real(3.0));
    }

    #[test]
    fn decimal_scaling() {
        let d = Decimal::new(12345, 2); // 123.45
        assert_eq!(encode(DEC, Value::Decimal(d), "c").unwrap(), RawValue::Integer(1_234_500));
        assert_eq!(round_trip(DEC, Value::Decimal(d)), Value::Decimal(d));

        // Half-to-even on the fifth fractional digit.
        let half = Decimal::new(100_005, 5); // 1.00005
        assert_eq!(encode(DEC, Value::Decimal(half), "c").unwrap(), RawValue::Integer(10_000));
    }

    #[test]
    fn decimal_limits() {
        let widest = DeclaredType::Decimal {
            precision: 19,
            scale: 0,
        };
        let max = Decimal::from(i64::MAX);
        assert_eq!(round_trip(widest, Value::Decimal(max)), Value::Decimal(max));

        let over = Decimal::from(i64::MAX) + Decimal::ONE;
        let err = encode(widest, Value::Decimal(over), "c").unwrap_err();
        assert!(matches!(err, Error::DecimalOverflow { .. }));

        // Largest value with precision 18 and scale 4.
        let largest = Decimal::new(999_999_999_999_999_999, 4);
        assert_eq!(round_trip(DEC, Value::Decimal(largest)), Value::Decimal(largest));
        let next = largest + Decimal::new(1, 4);
        assert!(matches!(encode(DEC, Value::Decimal(next), "c"), Err(Error::DecimalOverflow { .. })));
        assert!(matches!(encode(DEC, Value::Decimal(-next), "c"), Err(Error::DecimalOverflow { .. })));
    }

    #[test]
    fn uuid_requires_sixteen_bytes() {
        let id = Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef);
        assert_eq!(round_trip(DeclaredType::Uuid, Value::Uuid(id)), Value::Uuid(id));
        assert_eq!(round_trip(DeclaredType::Uuid, Value::Uuid(Uuid::nil())), Value::Uuid(Uuid::nil()));

        let short = decode(DeclaredType::Uuid, RawValue::Blob(vec![0; 15]), "c");
        assert!(matches!(short, Err(Error::Decode { .. })));
    }

    #[test]
    fn dates_count_days_from_epoch() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(encode(DeclaredType::Date, Value::Date(epoch), "c").unwrap(), RawValue::Integer(0));
        for d in [NaiveDate::MIN, epoch, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), NaiveDate::MAX] {
            assert_eq!(round_trip(DeclaredType::Date, Value::Date(d)), Value::Date(d));
        }
        let before = NaiveDate::from_ymd_opt(1969, 12, 31).unwrap();
        assert_eq!(encode(DeclaredType::Date, Value::Date(before), "c").unwrap(), RawValue::Integer(-1));
    }

    #[test]
    fn times_count_ticks_from_midnight() {
        let last = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_900).unwrap();
        assert_eq!(
            encode(DeclaredType::Time, Value::Time(last), "c").unwrap(),
            RawValue::Integer(TICKS_PER_DAY - 1)
        );
        for t in [NaiveTime::MIN, last, NaiveTime::from_hms_opt(12, 30, 0).unwrap()] {
            assert_eq!(round_trip(DeclaredType::Time, Value::Time(t)), Value::Time(t));
        }
        decode(DeclaredType::Time, RawValue::Integer(TICKS_PER_DAY), "c").unwrap_err();
    }

    #[test]
    fn leap_seconds_are_rejected_before_storage() {
        let leap = NaiveTime::from_hms_milli_opt(23, 59, 59, 1_500).unwrap();
        let err = encode(DeclaredType::Time, Value::Time(leap), "at").unwrap_err();
        assert!(matches!(err, Error::OutOfRange { .. }));
        assert!(err.is_validation());
    }

    #[test]
    fn sub_millisecond_timestamps_truncate() {
        let zone = DeclaredType::Timestamp(crate::Zone::Utc);
        let precise = DateTime::from_timestamp(1_700_000_000, 123_456_700).unwrap();
        let truncated = DateTime::from_timestamp(1_700_000_000, 123_000_000).unwrap();
        assert_eq!(round_trip(zone, Value::Timestamp(precise)), Value::Timestamp(truncated));
    }

    #[test]
    fn timestamps_are_utc_milliseconds() {
        let ts = DateTime::parse_from_rfc3339("2024-05-06T07:08:09.123Z").unwrap().with_timezone(&Utc);
        assert_eq!(
            encode(DeclaredType::Timestamp(crate::Zone::Utc), Value::Timestamp(ts), "c").unwrap(),
            RawValue::Integer(ts.timestamp_millis())
        );
        let zone = DeclaredType::Timestamp(crate::Zone::Naive);
        let naive = NaiveDateTime::parse_from_str("1900-01-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(
            round_trip(zone, Value::Timestamp(naive.and_utc())),
            Value::Timestamp(naive.and_utc())
        );
        assert_eq!(round_trip(zone, Value::Timestamp(DateTime::UNIX_EPOCH)), Value::Timestamp(DateTime::UNIX_EPOCH));
    }

    #[test]
    fn durations_are_signed_ticks() {
        let d = TimeDelta::milliseconds(-1500);
        assert_eq!(
            encode(DeclaredType::Duration, Value::Duration(d), "c").unwrap(),
            RawValue::Integer(-15_000_000)
        );
        for d in [TimeDelta::zero(), d, TimeDelta::days(365 * 1000), TimeDelta::nanoseconds(100)] {
            assert_eq!(round_trip(DeclaredType::Duration, Value::Duration(d)), Value::Duration(d));
        }
        for ticks in [i64::MIN, i64::MAX] {
            let value = decode(DeclaredType::Duration, RawValue::Integer(ticks), "c").unwrap();
            assert_eq!(encode(DeclaredType::Duration, value, "c").unwrap(), RawValue::Integer(ticks));
        }
        let too_long = encode(DeclaredType::Duration, Value::Duration(TimeDelta::MAX), "c");
        assert!(matches!(too_long, Err(Error::OutOfRange { .. })));
    }

    #[test]
    fn text_and_blob_pass_through() {
        for s in ["", "héllo"] {
            let v = Value::Text(s.to_string());
            assert_eq!(round_trip(DeclaredType::Text, v.clone()), v);
        }
        let v = Value::Blob(vec![0, 255, 7]);
        assert_eq!(round_trip(DeclaredType::Blob, v.clone()), v);
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = encode(DeclaredType::Bool, Value::Int(1), "flag").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
        let err = decode(DeclaredType::Int32, RawValue::Text("x".into()), "n").unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
