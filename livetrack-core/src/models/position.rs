use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in kilometres (haversine).
    pub fn distance_km(&self, other: &LatLng) -> f64 {
        let (phi1, phi2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lng - self.lng).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
    }
}

/// Payload of an inbound `courier-location` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub order_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl PositionUpdate {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Last known courier position as held by an active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourierFix {
    pub position: LatLng,
    pub city: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl From<&PositionUpdate> for CourierFix {
    fn from(update: &PositionUpdate) -> Self {
        Self {
            position: update.position(),
            city: update.city.clone(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_update_wire_format() {
        let update: PositionUpdate =
            serde_json::from_str(r#"{"orderId":"abc123","lat":13.0,"lng":77.6}"#).unwrap();
        assert_eq!(update.order_id, "abc123");
        assert_eq!(update.position(), LatLng::new(13.0, 77.6));
        assert!(update.city.is_none());

        let with_city: PositionUpdate = serde_json::from_str(
            r#"{"orderId":"abc123","lat":13.0,"lng":77.6,"city":"Mysuru"}"#,
        )
        .unwrap();
        assert_eq!(with_city.city.as_deref(), Some("Mysuru"));
    }

    #[test]
    fn test_distance_km() {
        let bengaluru = LatLng::new(12.9716, 77.5946);
        let mysuru = LatLng::new(12.2958, 76.6394);
        let d = bengaluru.distance_km(&mysuru);
        assert!((d - 127.0).abs() < 3.0, "unexpected distance {d}");
        assert_eq!(bengaluru.distance_km(&bengaluru), 0.0);
    }

    #[test]
    fn test_validity() {
        assert!(LatLng::new(12.9, 77.5).is_valid());
        assert!(!LatLng::new(91.0, 0.0).is_valid());
        assert!(!LatLng::new(0.0, f64::NAN).is_valid());
    }
}
