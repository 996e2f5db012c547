//! cloudify-geo — request geography and device resolution.
//!
//! Pure, side-effect-free parsing of proxy-populated geo headers and
//! User-Agent strings. Consumed by the A/B assignment engine (for
//! targeting) and by the edge runtime context (for region/country
//! tagging of invocations).

pub mod device;
pub mod region;
pub mod resolver;

pub use device::{detect_browser, detect_device, detect_os, DeviceType};
pub use region::{continent_for_country, is_eu_country, nearest_region, GLOBAL_REGION};
pub use resolver::{resolve_geo, GeoInfo, HeaderLookup};
