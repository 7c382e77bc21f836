use super::entry::ConfigEntry;

const LINES: [&str; 12] = [
    "OUTLET-PRESS: 100 PSI",
    ";OUTLET-PRESS: 50 PSI",
    "APER-MAP: maps/fracture-1.txt",
    "APER-MAP:",
    "INLET-RATE: 2.0 ML/MIN ; constant rate",
    ";; a plain comment",
    "",
    "SOLVER-ORDER second pass",
    r#"TITLE: "two words" ; quoted"#,
    r#"TITLE: it"s unbalanced"#,
    r"PATH: escaped\;semicolon",
    "MAP-NAME: '' PA",
];

#[test]
pub fn output_line_reparses_identically() {
    for line in LINES {
        let entry = ConfigEntry::parse(line);
        let reparsed = ConfigEntry::parse(&entry.output_line());

        assert_eq!(reparsed.keyword(), entry.keyword(), "keyword of {line:?}");
        assert_eq!(reparsed.value(), entry.value(), "value of {line:?}");
        assert_eq!(reparsed.unit(), entry.unit(), "unit of {line:?}");
        assert_eq!(
            reparsed.is_commented_out(),
            entry.is_commented_out(),
            "comment state of {line:?}"
        );
        assert_eq!(reparsed, entry, "entry of {line:?}");
    }
}

#[test]
pub fn output_line_is_stable() {
    for line in LINES {
        let once = ConfigEntry::parse(line).output_line();
        let twice = ConfigEntry::parse(&once).output_line();

        assert_eq!(once, twice, "output of {line:?}");
    }
}

#[test]
pub fn empty_value_keeps_unit_slot() {
    let entry = ConfigEntry::parse("MAP-NAME: '' PA");

    assert_eq!(entry.value(), "");
    assert_eq!(entry.unit(), Some("PA"));
    assert_eq!(entry.output_line(), r#"MAP-NAME: "" PA"#);
}
