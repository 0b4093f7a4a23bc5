//! Regional server catalog and nearest-server selection.
//!
//! The caller's approximate location comes from an IP geolocation lookup. The
//! chosen server id is cached on disk for 24 hours so the lookup runs at most
//! once a day.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use anonfly_common::{Error, Result};

pub const GEOLOCATION_URL: &str = "https://ip-api.com/json/?fields=status,country,continent,lat,lon";

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub region: &'static str,
    pub continents: &'static [&'static str],
    pub lat: f64,
    pub lon: f64,
}

pub const SERVERS: [ServerInfo; 4] = [
    ServerInfo {
        id: "srv1",
        name: "server-1",
        url: "https://anonfly-server-1.onrender.com",
        region: "Oregon, USA",
        continents: &["North America"],
        lat: 45.5951,
        lon: -121.1787,
    },
    ServerInfo {
        id: "srv2",
        name: "server-2",
        url: "https://anonfly-server-2.onrender.com",
        region: "Singapore",
        continents: &["Asia"],
        lat: 1.3521,
        lon: 103.8198,
    },
    ServerInfo {
        id: "srv3",
        name: "server-3",
        url: "https://anonfly-server-3.onrender.com",
        region: "Frankfurt, Germany",
        continents: &["Europe"],
        lat: 50.1109,
        lon: 8.6821,
    },
    ServerInfo {
        id: "srv4",
        name: "server-4",
        url: "https://anonfly-server-4.onrender.com",
        region: "Virginia, USA",
        continents: &["North America"],
        lat: 37.54,
        lon: -77.436,
    },
];

pub fn default_server() -> &'static ServerInfo {
    &SERVERS[0]
}

pub fn server_by_id(id: &str) -> Option<&'static ServerInfo> {
    SERVERS.iter().find(|s| s.id == id)
}

/// What the geolocation lookup could tell about the caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub continent: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl Location {
    pub fn at(lat: f64, lon: f64) -> Self {
        Self {
            continent: None,
            lat: Some(lat),
            lon: Some(lon),
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Closest server by distance, then the first server on the caller's
/// continent, then the default.
pub fn nearest_server(location: Option<&Location>) -> &'static ServerInfo {
    let Some(location) = location else {
        return default_server();
    };
    if let Some((lat, lon)) = location.coordinates() {
        return SERVERS
            .iter()
            .min_by(|a, b| {
                let da = haversine_km(lat, lon, a.lat, a.lon);
                let db = haversine_km(lat, lon, b.lat, b.lon);
                da.total_cmp(&db)
            })
            .unwrap_or_else(default_server);
    }
    location
        .continent
        .as_deref()
        .and_then(|continent| {
            SERVERS
                .iter()
                .find(|s| s.continents.iter().any(|c| c.eq_ignore_ascii_case(continent)))
        })
        .unwrap_or_else(default_server)
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    server_id: String,
    selected_at: DateTime<Utc>,
}

/// Single-entry JSON cache of the selected server id.
#[derive(Debug, Clone)]
pub struct ServerCache {
    path: PathBuf,
    ttl: Duration,
}

impl ServerCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: Duration::hours(24),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cached server if present, known, and younger than the TTL at `now`.
    pub fn load(&self, now: DateTime<Utc>) -> Option<&'static ServerInfo> {
        let raw = std::fs::read_to_string(&self.path).ok()?;
        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable server cache {}: {}", self.path.display(), e);
                return None;
            }
        };
        if now - entry.selected_at > self.ttl {
            debug!("Server cache expired");
            return None;
        }
        server_by_id(&entry.server_id)
    }

    pub fn store(&self, server: &ServerInfo, now: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = CacheEntry {
            server_id: server.id.to_string(),
            selected_at: now,
        };
        std::fs::write(&self.path, serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeolocationResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    continent: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// Best-effort IP geolocation. Any failure yields `None`.
pub async fn fetch_location(client: &reqwest::Client, url: &str) -> Option<Location> {
    let response = match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            warn!("Geolocation lookup returned {}", resp.status());
            return None;
        }
        Err(e) => {
            warn!("Geolocation lookup failed: {}", e);
            return None;
        }
    };
    let body: GeolocationResponse = match response.json().await {
        Ok(body) => body,
        Err(e) => {
            warn!("Geolocation response unreadable: {}", e);
            return None;
        }
    };
    if body.status.as_deref() == Some("fail") {
        return None;
    }
    let location = Location {
        continent: body.continent.filter(|c| !c.is_empty()),
        lat: body.lat,
        lon: body.lon,
    };
    if location.continent.is_none() && location.coordinates().is_none() {
        return None;
    }
    Some(location)
}

/// Pick the server to use: cached choice first, otherwise nearest by location.
pub async fn select_best_server(
    cache: &ServerCache,
    client: &reqwest::Client,
    geolocation_url: &str,
) -> &'static ServerInfo {
    let now = Utc::now();
    if let Some(server) = cache.load(now) {
        debug!("Using cached server {} ({})", server.id, server.region);
        return server;
    }

    let location = fetch_location(client, geolocation_url).await;
    let server = nearest_server(location.as_ref());
    info!("Selected server {} ({})", server.id, server.region);

    if let Err(e) = cache.store(server, now) {
        warn!("Failed to cache server selection: {}", e);
    }
    server
}
