//! File naming in the shared folder.
//!
//! Every convention lives here so call sites never split names themselves:
//!
//! - event:    `{yyyyMMddHHmmssSSS}_{nodeId}_{entityType}_{suffix}.json`
//! - snapshot: `snapshot_full_{appName}_{nodeId}.json`
//! - ledger:   `processed_{nodeId}.log`
//!
//! Node ids may contain underscores; entity type names and suffixes may not.
//! Files being written carry a leading dot and a `.tmp` extension and match
//! none of the patterns above.

use std::fmt;
use std::sync::OnceLock;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;

pub const EVENT_EXTENSION: &str = ".json";
pub const SNAPSHOT_PREFIX: &str = "snapshot_full_";
const LEDGER_PREFIX: &str = "processed_";
const LEDGER_EXTENSION: &str = ".log";
const TEMP_EXTENSION: &str = ".tmp";
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

fn event_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{17})_(.+)_([^_]+)_([^_]+)\.json$").expect("valid event name pattern")
    })
}

/// Metadata encoded in an event file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFileName {
    pub produced_at: NaiveDateTime,
    pub origin_node_id: String,
    pub entity_type: String,
    pub suffix: String,
}

impl EventFileName {
    /// Name for an event produced now, with a random 8-hex suffix.
    pub fn new(origin_node_id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Local::now().naive_local();
        // Truncate to the precision the name can carry.
        let produced_at = now
            .with_nanosecond(now.nanosecond() / 1_000_000 * 1_000_000)
            .unwrap_or(now);
        Self {
            produced_at,
            origin_node_id: origin_node_id.into(),
            entity_type: entity_type.into(),
            suffix: format!("{:08x}", rand::random::<u32>()),
        }
    }

    /// Recover the metadata from a file name. Returns `None` for anything that
    /// is not a well-formed event name, including snapshots and ledgers.
    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = event_name_pattern().captures(file_name)?;
        Some(Self {
            produced_at: parse_stamp(&captures[1])?,
            origin_node_id: captures[2].to_string(),
            entity_type: captures[3].to_string(),
            suffix: captures[4].to_string(),
        })
    }

    pub fn is_from(&self, node_id: &str) -> bool {
        self.origin_node_id == node_id
    }
}

impl fmt::Display for EventFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}{}",
            self.produced_at.format(STAMP_FORMAT),
            self.origin_node_id,
            self.entity_type,
            self.suffix,
            EVENT_EXTENSION
        )
    }
}

fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    let field = |range: std::ops::Range<usize>| stamp.get(range)?.parse::<u32>().ok();
    let year = stamp.get(0..4)?.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, field(4..6)?, field(6..8)?)?.and_hms_milli_opt(
        field(8..10)?,
        field(10..12)?,
        field(12..14)?,
        field(14..17)?,
    )
}

pub fn snapshot_file_name(app_name: &str, node_id: &str) -> String {
    format!("{}{}_{}{}", SNAPSHOT_PREFIX, app_name, node_id, EVENT_EXTENSION)
}

pub fn is_snapshot_file(file_name: &str) -> bool {
    file_name.starts_with(SNAPSHOT_PREFIX) && file_name.ends_with(EVENT_EXTENSION)
}

/// Application and node a snapshot name was produced by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOwner<'a> {
    pub app_name: &'a str,
    pub node_id: &'a str,
}

/// Split a snapshot name using the node ids known to write into the folder.
///
/// Application names and node ids may both contain underscores, so the split
/// is only exact against a known node id. The longest matching id wins:
/// `snapshot_full_x_NODE_A1.json` belongs to `NODE_A1`, not to `A1`.
pub fn snapshot_owner<'a, I>(file_name: &'a str, known_nodes: I) -> Option<SnapshotOwner<'a>>
where
    I: IntoIterator<Item = &'a str>,
{
    let stem = file_name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(EVENT_EXTENSION)?;
    known_nodes
        .into_iter()
        .filter_map(|node_id| {
            let app_name = stem.strip_suffix(node_id)?.strip_suffix('_')?;
            (!node_id.is_empty() && !app_name.is_empty()).then_some(SnapshotOwner {
                app_name,
                node_id: &stem[stem.len() - node_id.len()..],
            })
        })
        .max_by_key(|owner| owner.node_id.len())
}

/// Whether a snapshot of unknown origin names `app_name` as its application.
pub fn snapshot_is_from_app(file_name: &str, app_name: &str) -> bool {
    is_snapshot_file(file_name)
        && file_name
            .strip_prefix(SNAPSHOT_PREFIX)
            .and_then(|rest| rest.strip_prefix(app_name))
            .is_some_and(|rest| rest.starts_with('_') && rest.len() > 1 + EVENT_EXTENSION.len())
}

pub fn ledger_file_name(node_id: &str) -> String {
    format!("{}{}{}", LEDGER_PREFIX, node_id, LEDGER_EXTENSION)
}

/// Node id of a ledger file name.
pub fn ledger_node_id(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(LEDGER_PREFIX)?
        .strip_suffix(LEDGER_EXTENSION)
        .filter(|node_id| !node_id.is_empty())
}

/// Hidden name a file is written under before being renamed into place.
pub fn temporary_name(final_name: &str) -> String {
    format!(".{}{}", final_name, TEMP_EXTENSION)
}

pub fn is_temporary(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(TEMP_EXTENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_ids_with_underscores() {
        let name = EventFileName::parse("20250314093015123_NODE_7F3A21BC_Proveedor_1a2b3c4d.json")
            .expect("parse");
        assert_eq!(name.origin_node_id, "NODE_7F3A21BC");
        assert_eq!(name.entity_type, "Proveedor");
        assert_eq!(name.suffix, "1a2b3c4d");
        assert_eq!(
            name.produced_at,
            NaiveDate::from_ymd_opt(2025, 3, 14)
                .unwrap()
                .and_hms_milli_opt(9, 30, 15, 123)
                .unwrap()
        );
    }

    #[test]
    fn format_and_parse_agree() {
        let name = EventFileName::new("NODE_A1", "TipoProducto");
        let rendered = name.to_string();
        assert!(rendered.ends_with(".json"));
        assert_eq!(EventFileName::parse(&rendered), Some(name));
    }

    #[test]
    fn rejects_names_with_too_few_segments() {
        assert!(EventFileName::parse("20250314093015123_NODEA_Proveedor.json").is_none());
        assert!(EventFileName::parse("20250314093015123_Proveedor.json").is_none());
        assert!(EventFileName::parse("garbage.json").is_none());
    }

    #[test]
    fn rejects_bad_stamps_and_extensions() {
        assert!(EventFileName::parse("2025031409301512_NODE_Proveedor_1a2b3c4d.json").is_none());
        assert!(EventFileName::parse("20251332093015123_NODE_Proveedor_1a2b3c4d.json").is_none());
        assert!(EventFileName::parse("20250314093015123_NODE_Proveedor_1a2b3c4d.txt").is_none());
    }

    #[test]
    fn snapshot_and_ledger_names_are_not_events() {
        let snapshot = snapshot_file_name("microservicio_proveedor", "NODE_A1");
        assert_eq!(snapshot, "snapshot_full_microservicio_proveedor_NODE_A1.json");
        assert!(is_snapshot_file(&snapshot));
        assert!(EventFileName::parse(&snapshot).is_none());
        assert!(EventFileName::parse(&ledger_file_name("NODE_A1")).is_none());
    }

    #[test]
    fn snapshot_ownership_checks() {
        let snapshot = snapshot_file_name("producto", "NODE_A1");
        let owner = snapshot_owner(&snapshot, ["NODE_A1", "NODE_B2"]).expect("owner");
        assert_eq!(owner.app_name, "producto");
        assert_eq!(owner.node_id, "NODE_A1");
        assert!(snapshot_owner(&snapshot, ["NODE_B2"]).is_none());
        assert!(snapshot_is_from_app(&snapshot, "producto"));
        assert!(!snapshot_is_from_app(&snapshot, "proveedor"));
    }

    #[test]
    fn longest_known_node_id_owns_overlapping_names() {
        let owner = snapshot_owner("snapshot_full_x_NODE_A1.json", ["A1", "NODE_A1"]).expect("owner");
        assert_eq!(owner.node_id, "NODE_A1");
        assert_eq!(owner.app_name, "x");

        let owner = snapshot_owner("snapshot_full_producto_extra_NODE_B.json", ["NODE_B"])
            .expect("owner");
        assert_eq!(owner.app_name, "producto_extra");
        assert_ne!(owner.app_name, "producto");
    }

    #[test]
    fn app_prefix_needs_a_node_part() {
        assert!(!snapshot_is_from_app("snapshot_full_producto_.json", "producto"));
        assert!(!snapshot_is_from_app("snapshot_full_productos_NODE_B.json", "producto"));
        assert!(snapshot_is_from_app("snapshot_full_producto_NODE_B.json", "producto"));
    }

    #[test]
    fn ledger_names_carry_the_node_id() {
        assert_eq!(ledger_node_id(&ledger_file_name("NODE_A1")), Some("NODE_A1"));
        assert_eq!(ledger_node_id("processed_.log"), None);
        assert_eq!(ledger_node_id("notes.log"), None);
    }

    #[test]
    fn temporary_names_match_nothing() {
        let name = EventFileName::new("NODE_A1", "Dolar").to_string();
        let temp = temporary_name(&name);
        assert!(is_temporary(&temp));
        assert!(EventFileName::parse(&temp).is_none());
        assert!(!is_snapshot_file(&temp));
    }
}
