//! Snapshot naming scheme.
//!
//! Snapshots created by this crate are recognised purely by name: the disk
//! label followed by a fixed-width UTC timestamp suffix,
//! `<label>-YYMMDD-HHMMSS`.  Providers without tagging give us nothing else
//! to go on, so the suffix is anchored to the end of the name, has fixed
//! digit counts, and must decode to a real calendar instant.  A name that
//! fails any of these checks is never treated as ours.
//!
//! The suffix is versioned through [`NameFormat`].  Encoding always uses
//! [`NameFormat::CURRENT`]; decoding tries every known format, so names
//! written by an older format keep being recognised.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::{Result, SnapshotError};

/// `<label>-YYMMDD-HHMMSS`
static V1_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<label>.+)-(?P<date>\d{6})-(?P<time>\d{6})$")
        .expect("snapshot name pattern is valid")
});

/// Known snapshot name suffix formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameFormat {
    /// `-YYMMDD-HHMMSS`, second precision, UTC.
    V1,
}

impl NameFormat {
    /// Format used for new snapshot names.
    pub const CURRENT: NameFormat = NameFormat::V1;

    /// Every format a managed name may have been written with, newest first.
    pub const ALL: &'static [NameFormat] = &[NameFormat::V1];

    fn pattern(self) -> &'static Regex {
        match self {
            Self::V1 => &*V1_PATTERN,
        }
    }

    fn encode(self, label: &str, now: DateTime<Utc>) -> String {
        match self {
            Self::V1 => format!("{label}-{}", now.format("%y%m%d-%H%M%S")),
        }
    }

    fn decode(self, name: &str) -> Option<ManagedName> {
        let caps = self.pattern().captures(name)?;
        let digits = format!("{}{}", &caps["date"], &caps["time"]);
        let naive = NaiveDateTime::parse_from_str(&digits, "%y%m%d%H%M%S").ok()?;
        Some(ManagedName {
            label: caps["label"].to_owned(),
            created_at: naive.and_utc(),
            format: self,
        })
    }
}

/// A snapshot name decoded back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedName {
    /// Disk label the name was built from.
    pub label: String,
    /// Instant encoded in the suffix.
    pub created_at: DateTime<Utc>,
    /// Format the name was written with.
    pub format: NameFormat,
}

/// Build the name of a new snapshot for `disk_label` taken at `now`.
///
/// Deterministic: the same label within the same second yields the same
/// name, which is what makes a retried create recognisable.
///
/// Fails with [`SnapshotError::InvalidDisk`] for labels whose names could
/// not be decoded back (empty, or containing line breaks), since such a
/// snapshot would never be found again.
pub fn build_snapshot_name(disk_label: &str, now: DateTime<Utc>) -> Result<String> {
    let name = NameFormat::CURRENT.encode(disk_label, now);
    match parse_snapshot_name(&name) {
        Some(decoded) if decoded.label == disk_label => Ok(name),
        _ => Err(SnapshotError::InvalidDisk(format!(
            "disk label {disk_label:?} cannot be used in a snapshot name"
        ))),
    }
}

/// Decode a managed snapshot name.  `None` for anything this crate did not
/// create.
pub fn parse_snapshot_name(name: &str) -> Option<ManagedName> {
    NameFormat::ALL
        .iter()
        .find_map(|format| format.decode(name))
}

/// Whether `name` was produced by [`build_snapshot_name`] (in any known
/// format).
pub fn is_managed_snapshot_name(name: &str) -> bool {
    parse_snapshot_name(name).is_some()
}

/// Parse a provider timestamp (RFC 3339) and normalise it to UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn build_name_embeds_utc_suffix() {
        assert_eq!(
            build_snapshot_name("vol-123", instant()).unwrap(),
            "vol-123-230102-030405"
        );
    }

    #[test]
    fn recognises_built_names() {
        assert!(is_managed_snapshot_name("vol-123-230102-030405"));
        for label in ["a", "pvc-0a1b-2c3d", "data_disk.1", "x-111111-111111"] {
            let name = build_snapshot_name(label, instant()).unwrap();
            assert!(is_managed_snapshot_name(&name), "{name}");
        }
    }

    #[test]
    fn every_built_name_is_managed() {
        for label in [
            "a",
            "-",
            "--",
            " ",
            "pvc-",
            "-pvc",
            "vol-123-230102-030405",
            "disk\twith\ttabs",
            "ünïcødé-卷",
            "999999-999999",
        ] {
            let name = build_snapshot_name(label, instant()).unwrap();
            let decoded = parse_snapshot_name(&name).expect("managed");
            assert_eq!(decoded.label, label, "{name}");
            assert_eq!(decoded.created_at, instant());
        }
    }

    #[test]
    fn unrecognisable_labels_are_rejected() {
        for label in ["", "line\nbreak", "\n", "trailing\r\n"] {
            let err = build_snapshot_name(label, instant()).unwrap_err();
            assert!(matches!(err, SnapshotError::InvalidDisk(_)), "{label:?}");
        }
    }

    #[test]
    fn rejects_human_names() {
        for name in [
            "vol-123-manual-backup",
            "vol-123",
            "230102-030405",
            "-230102-030405",
            "vol-123-230102-030405-copy",
            "vol-123-230102-03040",
            "vol-123-2301020-030405",
            "vol-123-230102_030405",
            "vol-123-231399-030405",
            "vol-123-230102-250000",
            "",
        ] {
            assert!(!is_managed_snapshot_name(name), "{name}");
        }
    }

    #[test]
    fn decode_roundtrip_is_second_precise() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap()
            + chrono::Duration::milliseconds(750);
        let name = build_snapshot_name("pvc-a", now).unwrap();
        let decoded = parse_snapshot_name(&name).expect("managed");
        assert_eq!(decoded.label, "pvc-a");
        assert_eq!(decoded.format, NameFormat::V1);
        assert_eq!(
            decoded.created_at,
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap()
        );
    }

    #[test]
    fn encoding_ignores_source_offset() {
        let offset = chrono::FixedOffset::east_opt(9 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2023, 1, 2, 12, 4, 5).unwrap();
        let name = build_snapshot_name("vol-123", local.with_timezone(&Utc)).unwrap();
        assert_eq!(name, "vol-123-230102-030405");
    }

    #[test]
    fn parse_timestamp_normalises_to_utc() {
        assert_eq!(parse_timestamp("2023-01-02T03:04:05Z"), Some(instant()));
        assert_eq!(parse_timestamp("2023-01-02T05:04:05+02:00"), Some(instant()));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
