//! Runtime reconfiguration of the publish interval
//!
//! [`IntervalControl`] keeps the current publisher for a group of nodes and exposes a
//! property handler that swaps it for one with a new interval when a command arrives.

use super::periodic::PeriodicPublisher;
use crate::device::{HandlerResult, Property};
use crate::error::{HomieError, HomieResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Parse a duration such as `300ms`, `1.5s` or `1h30m`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. A bare `0` is accepted; every other
/// number needs a unit. Negative durations are rejected.
pub fn parse_duration(input: &str) -> HomieResult<Duration> {
    let text = input.trim();
    if text.is_empty() {
        return Err(HomieError::invalid_duration(input, "empty duration"));
    }

    let mut rest = text.strip_prefix('+').unwrap_or(text);
    if rest.starts_with('-') {
        return Err(HomieError::invalid_duration(input, "negative durations are not allowed"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(HomieError::invalid_duration(input, "missing number"));
    }

    let mut total_nanos = 0f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_end];
        let value: f64 = number
            .parse()
            .map_err(|_| HomieError::invalid_duration(input, format!("invalid number '{number}'")))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        let scale = match unit {
            "" => return Err(HomieError::invalid_duration(input, "missing unit")),
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            other => {
                return Err(HomieError::invalid_duration(
                    input,
                    format!("unknown unit '{other}'"),
                ))
            }
        };
        total_nanos += value * scale;
        rest = &rest[unit_end..];
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(HomieError::invalid_duration(input, "duration out of range"));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

/// Format a duration the way [`parse_duration`] reads it back
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if duration.subsec_nanos() % 1_000_000 != 0 {
        format!("{}ns", duration.as_nanos())
    } else if millis % 1000 != 0 {
        format!("{millis}ms")
    } else {
        format!("{}s", duration.as_secs())
    }
}

/// Owner of the current publisher for a group of nodes
pub struct IntervalControl {
    current: Mutex<PeriodicPublisher>,
}

impl IntervalControl {
    pub fn new(publisher: PeriodicPublisher) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(publisher),
        })
    }

    pub fn current(&self) -> PeriodicPublisher {
        self.current.lock().clone()
    }

    pub fn interval(&self) -> Duration {
        self.current.lock().interval()
    }

    /// Swap the current publisher for one ticking every `interval`
    pub fn reconfigure(&self, interval: Duration) -> HomieResult<()> {
        let mut current = self.current.lock();
        let next = current.respawn(interval)?;
        *current = next;
        info!(interval_ms = interval.as_millis() as u64, "Publish interval changed");
        Ok(())
    }

    /// Handler for a settable interval property.
    ///
    /// The swap only happens when the payload parses. On success the property takes the
    /// new value and echoes it.
    pub fn handler(
        self: &Arc<Self>,
    ) -> impl Fn(&Property, &[u8], &str) -> HandlerResult + Send + Sync + 'static {
        let control = Arc::downgrade(self);
        move |property, payload, _topic| {
            let Some(control) = control.upgrade() else {
                return Ok(false);
            };

            let text = std::str::from_utf8(payload)?.trim();
            let interval = parse_duration(text)?;
            control.reconfigure(interval)?;

            property.set_value(text);
            property.publish()?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_duration_units() {
        let cases = [
            ("0", Duration::ZERO),
            ("300ms", Duration::from_millis(300)),
            ("1.5s", Duration::from_millis(1500)),
            ("1h30m", Duration::from_secs(5400)),
            ("2m", Duration::from_secs(120)),
            ("10us", Duration::from_micros(10)),
            ("10µs", Duration::from_micros(10)),
            ("42ns", Duration::from_nanos(42)),
            ("+5s", Duration::from_secs(5)),
            (".5s", Duration::from_millis(500)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_duration(input).unwrap(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_parse_duration_errors() {
        for input in ["", "5", "-5s", "5x", "s", "1.2.3s", "ms5"] {
            let err = parse_duration(input).unwrap_err();
            assert!(
                matches!(err, HomieError::InvalidDuration { .. }),
                "input {input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_nanos(1_500)), "1500ns");
    }

    proptest! {
        #[test]
        fn test_millis_parse(ms in 1u64..10_000_000) {
            let parsed = parse_duration(&format!("{ms}ms")).unwrap();
            prop_assert_eq!(parsed, Duration::from_millis(ms));
        }

        #[test]
        fn test_format_parses_back(ms in 1u64..10_000_000) {
            let duration = Duration::from_millis(ms);
            prop_assert_eq!(parse_duration(&format_duration(duration)).unwrap(), duration);
        }
    }
}
