use async_trait::async_trait;
use tracing::debug;

use crate::{error::GeoError, models::position::LatLng};

/// One-shot source of the shopper's coordinates. There is no continuous
/// watch: a tracking session captures the position once at start.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn request_position(&self) -> Result<LatLng, GeoError>;
}

/// What the device reports when asked for its location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeviceGeolocation {
    Granted(LatLng),
    Denied,
    Unsupported,
}

impl DeviceGeolocation {
    pub fn from_settings(position: Option<LatLng>, deny: bool) -> Self {
        match (deny, position) {
            (true, _) => DeviceGeolocation::Denied,
            (false, Some(position)) => DeviceGeolocation::Granted(position),
            (false, None) => DeviceGeolocation::Unsupported,
        }
    }
}

#[async_trait]
impl GeolocationProvider for DeviceGeolocation {
    async fn request_position(&self) -> Result<LatLng, GeoError> {
        let result = match *self {
            DeviceGeolocation::Granted(position) => Ok(position),
            DeviceGeolocation::Denied => Err(GeoError::PermissionDenied),
            DeviceGeolocation::Unsupported => Err(GeoError::Unsupported),
        };
        debug!(?result, "geolocation requested");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_device_geolocation() {
        let here = LatLng::new(12.9, 77.5);
        assert_eq!(
            DeviceGeolocation::from_settings(Some(here), false)
                .request_position()
                .await,
            Ok(here)
        );
        assert_eq!(
            DeviceGeolocation::from_settings(Some(here), true)
                .request_position()
                .await,
            Err(GeoError::PermissionDenied)
        );
        assert_eq!(
            DeviceGeolocation::from_settings(None, false)
                .request_position()
                .await,
            Err(GeoError::Unsupported)
        );
    }
}
