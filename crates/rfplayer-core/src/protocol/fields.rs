//! Field abbreviation and value translation tables
//!
//! Decoders store semantic fields under short abbreviations. Event extraction
//! maps each abbreviation to the full field name that consumers see.

/// Abbreviation to full field name
pub const PACKET_FIELDS: &[(&str, &str)] = &[
    ("batl", "battery_level"),
    ("batv", "battery"),
    ("cmd", "command"),
    ("sta", "detector"),
    ("sen", "sensor"),
    ("cov", "cover"),
    ("swi", "switch"),
    ("temperature", "temperature"),
    ("hygrometry", "hygrometry"),
    ("prs", "pressure"),
    ("alm", "alarm"),
    ("tmr", "tamper"),
    ("sup", "supervisor"),
    ("bt1", "button1"),
    ("bt2", "button2"),
    ("bt3", "button3"),
    ("bt4", "button4"),
    ("btn", "button"),
    ("spd", "speed"),
    ("dir", "direction"),
    ("uv", "uv"),
    ("nrj", "energy"),
    ("pow", "power"),
    ("P1", "P1"),
    ("P2", "P2"),
    ("P3", "P3"),
    ("TRN", "total_rain"),
    ("Rai", "rain"),
    ("fnc", "function"),
    ("mod", "mode"),
    ("typ", "sub_type"),
    ("dbg", "debug"),
    ("info", "info"),
    ("dim", "dim"),
    ("hc1", "cnt1"),
    ("hp2", "cnt2"),
];

/// Full field name for an abbreviation
pub fn full_name(abbrev: &str) -> Option<&'static str> {
    PACKET_FIELDS
        .iter()
        .find(|(a, _)| *a == abbrev)
        .map(|(_, full)| *full)
}

/// Abbreviation for a full field name
pub fn abbreviation(full: &str) -> Option<&'static str> {
    PACKET_FIELDS
        .iter()
        .find(|(_, f)| *f == full)
        .map(|(abbrev, _)| *abbrev)
}

/// Detector qualifier codes
const DTC_STATUS_LOOKUP: &[(&str, &str)] = &[
    ("0", "closed"),
    ("2", "open"),
    ("8", "alive"),
    ("16", "assoc"),
    ("18", "test"),
];

/// RTS qualifier codes
const RTS_STATUS_LOOKUP: &[(&str, &str)] = &[
    ("1", "DOWN"),
    ("4", "MY"),
    ("7", "UP"),
    ("13", "ASSOC"),
    ("5", "LEFT"),
    ("6", "RIGHT"),
];

/// RTS sub-types
const RTS_ELEM: &[(&str, &str)] = &[("0", "shu"), ("1", "por")];

fn lookup(table: &[(&str, &'static str)], code: &str) -> Option<&'static str> {
    table.iter().find(|(c, _)| *c == code).map(|(_, v)| *v)
}

/// Detector status for a qualifier code
pub fn detector_status(code: &str) -> Option<&'static str> {
    lookup(DTC_STATUS_LOOKUP, code)
}

/// Cover action for an RTS qualifier code
pub fn rts_status(code: &str) -> Option<&'static str> {
    lookup(RTS_STATUS_LOOKUP, code)
}

/// Element kind (shutter or portal) for an RTS sub-type
pub fn rts_element(code: &str) -> Option<&'static str> {
    lookup(RTS_ELEM, code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_lookup() {
        assert_eq!(full_name("sta"), Some("detector"));
        assert_eq!(full_name("cmd"), Some("command"));
        assert_eq!(full_name("nope"), None);
    }

    #[test]
    fn test_abbreviations_are_unique() {
        for (i, (abbrev, _)) in PACKET_FIELDS.iter().enumerate() {
            assert!(
                PACKET_FIELDS[i + 1..].iter().all(|(a, _)| a != abbrev),
                "duplicate abbreviation {abbrev}"
            );
        }
    }

    #[test]
    fn test_full_names_reverse() {
        for (abbrev, full) in PACKET_FIELDS {
            assert_eq!(abbreviation(full), Some(*abbrev));
        }
    }

    #[test]
    fn test_translations() {
        assert_eq!(detector_status("2"), Some("open"));
        assert_eq!(detector_status("3"), None);
        assert_eq!(rts_status("7"), Some("UP"));
        assert_eq!(rts_element("1"), Some("por"));
    }
}
