//! Spatial constraints and the predicates built from them.

use super::geometry::{GeoPoint, Geometry, Polygon};
use super::RagError;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Center point and radius in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusConstraint {
    pub center: GeoPoint,
    pub radius_m: f64,
}

/// The spatial part of a query.
///
/// Radius and region are meant to be mutually exclusive. When both are set the
/// region is the predicate and the radius center stays the distance reference;
/// when neither is set every document is a candidate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<RadiusConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Geometry>,
}

impl SpatialConstraint {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn radius(center: GeoPoint, radius_m: f64) -> Self {
        Self {
            radius: Some(RadiusConstraint { center, radius_m }),
            region: None,
        }
    }

    pub fn region(polygon: Polygon) -> Self {
        Self {
            radius: None,
            region: Some(Geometry::Polygon(polygon)),
        }
    }
}

/// Predicate descriptor handed to the candidate store.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    /// No spatial filtering; spatial scoring is switched off.
    Any,
    /// Representative point within `radius_m` of `center`.
    Radius { center: GeoPoint, radius_m: f64 },
    /// Geometry intersects `polygon`; distances are measured to `reference`,
    /// the supplied center if any, otherwise the polygon centroid.
    Region { polygon: Polygon, reference: GeoPoint },
}

impl SpatialFilter {
    /// Builds the predicate for a constraint.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidRegion`] when the region is not a valid polygon
    /// - [`RagError::InvalidRequest`] when the radius is not positive or the
    ///   center is not a WGS84 coordinate (a center given alongside a region
    ///   is still validated; its radius is ignored)
    pub fn build(constraint: &SpatialConstraint) -> Result<Self, RagError> {
        if let Some(region) = &constraint.region {
            if constraint.radius.is_some() {
                warn!("Both radius and region supplied; region takes precedence");
            }
            let polygon = match region {
                Geometry::Polygon(polygon) => polygon,
                other => {
                    return Err(RagError::InvalidRegion(format!(
                        "expected a Polygon, got {}",
                        other.kind()
                    )))
                }
            };
            polygon
                .validate()
                .map_err(|e| RagError::InvalidRegion(e.to_string()))?;
            let reference = match constraint.radius {
                Some(RadiusConstraint { center, .. }) => {
                    center
                        .validate()
                        .map_err(|e| RagError::InvalidRequest(e.to_string()))?;
                    center
                }
                None => polygon.centroid(),
            };
            return Ok(Self::Region {
                polygon: polygon.clone(),
                reference,
            });
        }

        if let Some(RadiusConstraint { center, radius_m }) = constraint.radius {
            if !(radius_m.is_finite() && radius_m > 0.0) {
                return Err(RagError::InvalidRequest(format!(
                    "radius must be a positive number of meters, got {}",
                    radius_m
                )));
            }
            center
                .validate()
                .map_err(|e| RagError::InvalidRequest(e.to_string()))?;
            return Ok(Self::Radius { center, radius_m });
        }

        Ok(Self::Any)
    }

    pub fn is_spatial(&self) -> bool {
        !matches!(self, Self::Any)
    }

    /// Point that spatial distances are measured from.
    pub fn reference_point(&self) -> Option<GeoPoint> {
        match self {
            Self::Any => None,
            Self::Radius { center, .. } => Some(*center),
            Self::Region { reference, .. } => Some(*reference),
        }
    }

    /// Exact evaluation of the predicate against a document geometry.
    ///
    /// Documents without a geometry only pass the universal predicate.
    pub fn matches(&self, geometry: Option<&Geometry>) -> bool {
        match (self, geometry) {
            (Self::Any, _) => true,
            (_, None) => false,
            (Self::Radius { center, radius_m }, Some(geometry)) => {
                geometry.representative_point().haversine_m(center) <= *radius_m
            }
            (Self::Region { polygon, .. }, Some(geometry)) => geometry.intersects(polygon),
        }
    }

    /// Distance in meters from the document's representative point to the
    /// reference point, if the filter is spatial.
    pub fn distance_m(&self, geometry: Option<&Geometry>) -> Option<f64> {
        let reference = self.reference_point()?;
        geometry.map(|g| g.representative_point().haversine_m(&reference))
    }
}
