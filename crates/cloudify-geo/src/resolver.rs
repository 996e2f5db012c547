//! Geo header resolution.
//!
//! Detects which upstream CDN populated geo headers (by header
//! presence, in priority order) and extracts location metadata
//! accordingly, falling back to generic `x-country`/`x-city` headers.

use serde::{Deserialize, Serialize};

use crate::region::continent_for_country;

/// Read-only access to request headers, case-insensitive by contract.
///
/// Implemented by the middleware header map; a `HashMap<String,
/// String>` with lowercase keys works for tests.
pub trait HeaderLookup {
    fn get_header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for std::collections::HashMap<String, String> {
    fn get_header(&self, name: &str) -> Option<&str> {
        self.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Geographic metadata resolved from request headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// ISO 3166-1 alpha-2 country code, uppercased.
    pub country: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    /// Continent code (e.g. "EU"), inferred from country when not
    /// directly supplied.
    pub continent: Option<String>,
}

/// Resolve geo metadata from whatever proxy headers are present.
///
/// Provider priority: Cloudflare, then Vercel, then CloudFront, then
/// the generic `x-country`/`x-city` pair. The first provider whose
/// country header is present wins outright; mixing headers across
/// providers is not attempted.
pub fn resolve_geo<H: HeaderLookup>(headers: &H) -> GeoInfo {
    let mut info = if headers.get_header("cf-ipcountry").is_some() {
        GeoInfo {
            country: normalize_country(headers.get_header("cf-ipcountry")),
            city: headers.get_header("cf-ipcity").map(str::to_string),
            region: headers.get_header("cf-region").map(str::to_string),
            latitude: parse_coord(headers.get_header("cf-iplatitude")),
            longitude: parse_coord(headers.get_header("cf-iplongitude")),
            timezone: headers.get_header("cf-timezone").map(str::to_string),
            continent: headers.get_header("cf-ipcontinent").map(str::to_string),
        }
    } else if headers.get_header("x-vercel-ip-country").is_some() {
        GeoInfo {
            country: normalize_country(headers.get_header("x-vercel-ip-country")),
            city: headers.get_header("x-vercel-ip-city").map(str::to_string),
            region: headers
                .get_header("x-vercel-ip-country-region")
                .map(str::to_string),
            latitude: parse_coord(headers.get_header("x-vercel-ip-latitude")),
            longitude: parse_coord(headers.get_header("x-vercel-ip-longitude")),
            timezone: headers.get_header("x-vercel-ip-timezone").map(str::to_string),
            continent: None,
        }
    } else if headers.get_header("cloudfront-viewer-country").is_some() {
        GeoInfo {
            country: normalize_country(headers.get_header("cloudfront-viewer-country")),
            city: headers
                .get_header("cloudfront-viewer-city")
                .map(str::to_string),
            region: headers
                .get_header("cloudfront-viewer-country-region")
                .map(str::to_string),
            latitude: parse_coord(headers.get_header("cloudfront-viewer-latitude")),
            longitude: parse_coord(headers.get_header("cloudfront-viewer-longitude")),
            timezone: headers
                .get_header("cloudfront-viewer-time-zone")
                .map(str::to_string),
            continent: None,
        }
    } else {
        GeoInfo {
            country: normalize_country(headers.get_header("x-country")),
            city: headers.get_header("x-city").map(str::to_string),
            region: None,
            latitude: None,
            longitude: None,
            timezone: None,
            continent: None,
        }
    };

    if info.continent.is_none() {
        info.continent = info
            .country
            .as_deref()
            .and_then(continent_for_country)
            .map(str::to_string);
    }
    info
}

fn normalize_country(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    // Cloudflare uses "XX" for unknown.
    if value.is_empty() || value.eq_ignore_ascii_case("xx") {
        return None;
    }
    Some(value.to_ascii_uppercase())
}

fn parse_coord(value: Option<&str>) -> Option<f64> {
    value?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cloudflare_headers_win() {
        let h = headers(&[
            ("cf-ipcountry", "de"),
            ("cf-ipcity", "Berlin"),
            ("cf-iplatitude", "52.52"),
            ("cf-iplongitude", "13.405"),
            ("cf-timezone", "Europe/Berlin"),
            // Vercel headers present too — must be ignored.
            ("x-vercel-ip-country", "US"),
        ]);
        let geo = resolve_geo(&h);
        assert_eq!(geo.country.as_deref(), Some("DE"));
        assert_eq!(geo.city.as_deref(), Some("Berlin"));
        assert_eq!(geo.latitude, Some(52.52));
        assert_eq!(geo.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(geo.continent.as_deref(), Some("EU"));
    }

    #[test]
    fn vercel_headers_second() {
        let h = headers(&[
            ("x-vercel-ip-country", "JP"),
            ("x-vercel-ip-city", "Tokyo"),
            ("cloudfront-viewer-country", "US"),
        ]);
        let geo = resolve_geo(&h);
        assert_eq!(geo.country.as_deref(), Some("JP"));
        assert_eq!(geo.city.as_deref(), Some("Tokyo"));
        assert_eq!(geo.continent.as_deref(), Some("AS"));
    }

    #[test]
    fn cloudfront_headers_third() {
        let h = headers(&[
            ("cloudfront-viewer-country", "BR"),
            ("cloudfront-viewer-city", "S\u{e3}o Paulo"),
        ]);
        let geo = resolve_geo(&h);
        assert_eq!(geo.country.as_deref(), Some("BR"));
        assert_eq!(geo.continent.as_deref(), Some("SA"));
    }

    #[test]
    fn generic_fallback() {
        let h = headers(&[("x-country", "fr"), ("x-city", "Paris")]);
        let geo = resolve_geo(&h);
        assert_eq!(geo.country.as_deref(), Some("FR"));
        assert_eq!(geo.city.as_deref(), Some("Paris"));
        assert_eq!(geo.continent.as_deref(), Some("EU"));
    }

    #[test]
    fn empty_headers_resolve_to_nothing() {
        let geo = resolve_geo(&headers(&[]));
        assert_eq!(geo, GeoInfo::default());
    }

    #[test]
    fn unknown_country_sentinel_is_dropped() {
        let h = headers(&[("cf-ipcountry", "XX")]);
        let geo = resolve_geo(&h);
        assert!(geo.country.is_none());
        assert!(geo.continent.is_none());
    }

    #[test]
    fn malformed_coordinates_are_ignored() {
        let h = headers(&[
            ("cf-ipcountry", "US"),
            ("cf-iplatitude", "not-a-number"),
        ]);
        let geo = resolve_geo(&h);
        assert!(geo.latitude.is_none());
    }

    #[test]
    fn explicit_continent_is_preserved() {
        let h = headers(&[("cf-ipcountry", "US"), ("cf-ipcontinent", "NA")]);
        let geo = resolve_geo(&h);
        assert_eq!(geo.continent.as_deref(), Some("NA"));
    }
}
