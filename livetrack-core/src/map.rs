use serde::Serialize;
use std::fmt;

use crate::models::position::{CourierFix, LatLng};

pub const OSM_TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_ZOOM: u8 = 13;
const DEFAULT_CITY: &str = "City";

/// Where map tiles come from and how close to zoom in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileSurface {
    pub tile_url: String,
    pub zoom: u8,
}

impl Default for TileSurface {
    fn default() -> Self {
        Self {
            tile_url: OSM_TILE_URL.into(),
            zoom: DEFAULT_ZOOM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// No map surface on this device.
    NoSurface,
    /// The shopper position is not known yet.
    AwaitingShopper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    Shopper,
    Courier,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    pub kind: MarkerKind,
    pub position: LatLng,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum MapView {
    Unavailable {
        reason: UnavailableReason,
    },
    Ready {
        center: LatLng,
        zoom: u8,
        tile_url: String,
        markers: Vec<Marker>,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance_km: Option<f64>,
    },
}

impl MapView {
    pub fn markers(&self) -> &[Marker] {
        match self {
            MapView::Ready { markers, .. } => markers,
            MapView::Unavailable { .. } => &[],
        }
    }

    pub fn courier_marker(&self) -> Option<&Marker> {
        self.markers()
            .iter()
            .find(|marker| marker.kind == MarkerKind::Courier)
    }
}

impl fmt::Display for MapView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapView::Unavailable {
                reason: UnavailableReason::NoSurface,
            } => f.write_str("map unavailable on this device"),
            MapView::Unavailable {
                reason: UnavailableReason::AwaitingShopper,
            } => f.write_str("waiting for your location"),
            MapView::Ready {
                center,
                zoom,
                markers,
                distance_km,
                ..
            } => {
                write!(f, "map at ({:.5}, {:.5}) zoom {zoom}", center.lat, center.lng)?;
                for marker in markers {
                    write!(
                        f,
                        "; {} ({:.5}, {:.5})",
                        marker.label, marker.position.lat, marker.position.lng
                    )?;
                }
                if let Some(km) = distance_km {
                    write!(f, "; {km:.2} km apart")?;
                }
                Ok(())
            }
        }
    }
}

/// Turns the two positions of a tracking session into a view.
///
/// Rendering is a pure function of its inputs; the same positions always
/// produce the same view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapRenderer {
    surface: Option<TileSurface>,
}

impl MapRenderer {
    pub fn headless() -> Self {
        Self { surface: None }
    }

    pub fn with_surface(surface: TileSurface) -> Self {
        Self {
            surface: Some(surface),
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn render(&self, shopper: Option<LatLng>, courier: Option<&CourierFix>) -> MapView {
        let Some(surface) = &self.surface else {
            return MapView::Unavailable {
                reason: UnavailableReason::NoSurface,
            };
        };
        let Some(shopper) = shopper else {
            return MapView::Unavailable {
                reason: UnavailableReason::AwaitingShopper,
            };
        };

        let mut markers = vec![Marker {
            kind: MarkerKind::Shopper,
            position: shopper,
            label: "You".into(),
        }];
        let distance_km = courier.map(|fix| {
            let city = fix.city.as_deref().unwrap_or(DEFAULT_CITY);
            markers.push(Marker {
                kind: MarkerKind::Courier,
                position: fix.position,
                label: format!("Courier from {city}"),
            });
            shopper.distance_km(&fix.position)
        });

        MapView::Ready {
            center: shopper,
            zoom: surface.zoom,
            tile_url: surface.tile_url.clone(),
            markers,
            distance_km,
        }
    }
}
