//! Fixed lookup tables: EU membership, country→continent, and
//! continent→preferred serving regions.

/// Sentinel returned when no serving region is available.
pub const GLOBAL_REGION: &str = "global";

/// EU member states (ISO 3166-1 alpha-2).
const EU_COUNTRIES: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

/// Country → continent code. Not exhaustive; covers the countries the
/// serving regions care about, with the long tail defaulting to None.
const COUNTRY_CONTINENTS: &[(&str, &str)] = &[
    // North America
    ("US", "NA"),
    ("CA", "NA"),
    ("MX", "NA"),
    // South America
    ("BR", "SA"),
    ("AR", "SA"),
    ("CL", "SA"),
    ("CO", "SA"),
    ("PE", "SA"),
    // Europe
    ("GB", "EU"),
    ("IE", "EU"),
    ("FR", "EU"),
    ("DE", "EU"),
    ("NL", "EU"),
    ("BE", "EU"),
    ("ES", "EU"),
    ("PT", "EU"),
    ("IT", "EU"),
    ("CH", "EU"),
    ("AT", "EU"),
    ("PL", "EU"),
    ("CZ", "EU"),
    ("SE", "EU"),
    ("NO", "EU"),
    ("DK", "EU"),
    ("FI", "EU"),
    ("GR", "EU"),
    ("RO", "EU"),
    ("HU", "EU"),
    ("UA", "EU"),
    // Asia
    ("JP", "AS"),
    ("KR", "AS"),
    ("CN", "AS"),
    ("TW", "AS"),
    ("HK", "AS"),
    ("SG", "AS"),
    ("IN", "AS"),
    ("ID", "AS"),
    ("TH", "AS"),
    ("VN", "AS"),
    ("MY", "AS"),
    ("PH", "AS"),
    ("AE", "AS"),
    ("SA", "AS"),
    ("IL", "AS"),
    ("TR", "AS"),
    // Africa
    ("ZA", "AF"),
    ("NG", "AF"),
    ("EG", "AF"),
    ("KE", "AF"),
    ("MA", "AF"),
    // Oceania
    ("AU", "OC"),
    ("NZ", "OC"),
];

/// Continent → serving regions in preference order.
const CONTINENT_REGIONS: &[(&str, &[&str])] = &[
    ("NA", &["us-east", "us-west", "eu-west"]),
    ("SA", &["sa-east", "us-east", "us-west"]),
    ("EU", &["eu-west", "eu-central", "us-east"]),
    ("AS", &["ap-southeast", "ap-northeast", "eu-central"]),
    ("AF", &["eu-west", "eu-central", "ap-southeast"]),
    ("OC", &["ap-southeast", "us-west", "ap-northeast"]),
];

/// EU membership check.
pub fn is_eu_country(country: &str) -> bool {
    let upper = country.to_ascii_uppercase();
    EU_COUNTRIES.contains(&upper.as_str())
}

/// Continent code for a country, if known.
pub fn continent_for_country(country: &str) -> Option<&'static str> {
    let upper = country.to_ascii_uppercase();
    COUNTRY_CONTINENTS
        .iter()
        .find(|(c, _)| *c == upper)
        .map(|(_, continent)| *continent)
}

/// Pick the nearest serving region for a continent.
///
/// Returns the first available region from the continent's preference
/// list, else the first available region at all, else the
/// [`GLOBAL_REGION`] sentinel when no regions are available.
pub fn nearest_region(continent: Option<&str>, available: &[&str]) -> String {
    if available.is_empty() {
        return GLOBAL_REGION.to_string();
    }
    if let Some(continent) = continent {
        let preferences = CONTINENT_REGIONS
            .iter()
            .find(|(c, _)| c.eq_ignore_ascii_case(continent))
            .map(|(_, regions)| *regions)
            .unwrap_or(&[]);
        for preferred in preferences {
            if available.iter().any(|r| r == preferred) {
                return (*preferred).to_string();
            }
        }
    }
    available[0].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eu_membership() {
        assert!(is_eu_country("DE"));
        assert!(is_eu_country("fr"));
        assert!(!is_eu_country("GB"));
        assert!(!is_eu_country("US"));
        assert!(!is_eu_country("NO"));
    }

    #[test]
    fn continent_lookup() {
        assert_eq!(continent_for_country("us"), Some("NA"));
        assert_eq!(continent_for_country("JP"), Some("AS"));
        assert_eq!(continent_for_country("BR"), Some("SA"));
        assert_eq!(continent_for_country("ZZ"), None);
    }

    #[test]
    fn region_prefers_continent_ordering() {
        let available = ["eu-central", "us-east", "ap-southeast"];
        assert_eq!(nearest_region(Some("EU"), &available), "eu-central");
        assert_eq!(nearest_region(Some("NA"), &available), "us-east");
        assert_eq!(nearest_region(Some("OC"), &available), "ap-southeast");
    }

    #[test]
    fn region_first_preference_wins_when_present() {
        let available = ["us-west", "us-east"];
        assert_eq!(nearest_region(Some("NA"), &available), "us-east");
    }

    #[test]
    fn region_falls_back_to_first_available() {
        // None of AS's preferred regions are present.
        let available = ["sa-east"];
        assert_eq!(nearest_region(Some("AS"), &available), "sa-east");
        // Unknown continent.
        assert_eq!(nearest_region(Some("??"), &available), "sa-east");
        // No continent at all.
        assert_eq!(nearest_region(None, &available), "sa-east");
    }

    #[test]
    fn region_global_sentinel_when_empty() {
        assert_eq!(nearest_region(Some("EU"), &[]), GLOBAL_REGION);
        assert_eq!(nearest_region(None, &[]), GLOBAL_REGION);
    }
}
