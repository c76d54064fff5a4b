//! Raspberry Pi 40-pin header numbering
//!
//! Configuration refers to pins by their physical header position; the
//! kernel addresses lines by BCM number.

/// `(physical, bcm)` for every header position that carries a GPIO line.
/// Positions 1, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34 and 39 are power/ground.
const HEADER_MAP: &[(u8, u8)] = &[
    (3, 2),
    (5, 3),
    (7, 4),
    (8, 14),
    (10, 15),
    (11, 17),
    (12, 18),
    (13, 27),
    (15, 22),
    (16, 23),
    (18, 24),
    (19, 10),
    (21, 9),
    (22, 25),
    (23, 11),
    (24, 8),
    (26, 7),
    (27, 0),
    (28, 1),
    (29, 5),
    (31, 6),
    (32, 12),
    (33, 13),
    (35, 19),
    (36, 16),
    (37, 26),
    (38, 20),
    (40, 21),
];

/// Map a physical header pin to its BCM line, `None` for power/ground or out of range
pub fn physical_to_bcm(physical: u8) -> Option<u8> {
    HEADER_MAP
        .iter()
        .find(|(p, _)| *p == physical)
        .map(|(_, bcm)| *bcm)
}

/// True if the physical pin is a usable GPIO line
pub fn is_gpio_pin(physical: u8) -> bool {
    physical_to_bcm(physical).is_some()
}

/// Parse a pin identifier as carried in an accessory serial number
pub fn parse_pin(raw: &str) -> Option<u8> {
    raw.trim().parse::<u8>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_mappings() {
        assert_eq!(physical_to_bcm(7), Some(4));
        assert_eq!(physical_to_bcm(11), Some(17));
        assert_eq!(physical_to_bcm(40), Some(21));
        assert_eq!(physical_to_bcm(27), Some(0));
    }

    #[test]
    fn test_power_and_ground_pins() {
        for p in [1u8, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34, 39] {
            assert!(!is_gpio_pin(p), "pin {} should not be a GPIO", p);
        }
        assert_eq!(physical_to_bcm(0), None);
        assert_eq!(physical_to_bcm(41), None);
    }

    #[test]
    fn test_every_bcm_line_appears_once() {
        let mut seen: Vec<u8> = HEADER_MAP.iter().map(|(_, b)| *b).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), HEADER_MAP.len());
    }

    #[test]
    fn test_parse_pin() {
        assert_eq!(parse_pin("5"), Some(5));
        assert_eq!(parse_pin(" 12 "), Some(12));
        assert_eq!(parse_pin("abc"), None);
        assert_eq!(parse_pin("-1"), None);
        assert_eq!(parse_pin("300"), None);
    }
}
