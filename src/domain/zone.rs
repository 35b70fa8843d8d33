//! Detection zones: named polygons with the activity rules active inside them
//!
//! Containment uses ray casting with a half-open convention: a point on an
//! edge counts as inside when it lies on an edge with maximal x or y (right
//! or top of an axis-aligned square) and outside on the minimal edges.

use crate::domain::activity::{ActivityType, UnknownActivityType};
use crate::domain::types::Point;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneType {
    Restricted,
    Monitored,
    Safe,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::Restricted => "restricted",
            ZoneType::Monitored => "monitored",
            ZoneType::Safe => "safe",
        }
    }
}

#[derive(Debug, Error)]
pub enum ZoneError {
    #[error("zone name must not be empty")]
    EmptyName,
    #[error("zone '{zone}' needs at least 3 points, got {count}")]
    TooFewPoints { zone: String, count: usize },
    #[error("zone '{zone}' has a non-finite coordinate at vertex {index}")]
    NonFiniteVertex { zone: String, index: usize },
    #[error("zone '{zone}': {source}")]
    UnknownActivity {
        zone: String,
        #[source]
        source: UnknownActivityType,
    },
    #[error("zone '{0}' already exists")]
    Duplicate(String),
}

/// Activity kinds evaluated inside a zone
pub type ActivitySet = SmallVec<[ActivityType; 4]>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionZone {
    name: String,
    points: Vec<Point>,
    zone_type: ZoneType,
    activity_types: ActivitySet,
}

impl DetectionZone {
    /// Validate and build a zone
    pub fn new(
        name: impl Into<String>,
        points: Vec<Point>,
        zone_type: ZoneType,
        activity_types: impl IntoIterator<Item = ActivityType>,
    ) -> Result<Self, ZoneError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ZoneError::EmptyName);
        }
        if points.len() < 3 {
            return Err(ZoneError::TooFewPoints { zone: name, count: points.len() });
        }
        if let Some(index) = points.iter().position(|p| !p.is_finite()) {
            return Err(ZoneError::NonFiniteVertex { zone: name, index });
        }

        let mut set = ActivitySet::new();
        for t in activity_types {
            if !set.contains(&t) {
                set.push(t);
            }
        }

        Ok(Self { name, points, zone_type, activity_types: set })
    }

    /// Build a zone from configuration strings, rejecting unknown activity names
    pub fn parse(
        name: impl Into<String>,
        points: Vec<Point>,
        zone_type: ZoneType,
        activity_names: &[String],
    ) -> Result<Self, ZoneError> {
        let name = name.into();
        let mut types = Vec::with_capacity(activity_names.len());
        for raw in activity_names {
            let t = raw
                .parse::<ActivityType>()
                .map_err(|source| ZoneError::UnknownActivity { zone: name.clone(), source })?;
            types.push(t);
        }
        Self::new(name, points, zone_type, types)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn zone_type(&self) -> ZoneType {
        self.zone_type
    }

    pub fn activity_types(&self) -> &[ActivityType] {
        &self.activity_types
    }

    pub fn watches(&self, activity: ActivityType) -> bool {
        self.activity_types.contains(&activity)
    }

    pub fn contains(&self, p: &Point) -> bool {
        point_in_polygon(p, &self.points)
    }
}

/// Ray-casting containment test, see module docs for the edge convention
pub fn point_in_polygon(p: &Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut p1 = polygon[0];
    for i in 1..=n {
        let p2 = polygon[i % n];
        if p.y > p1.y.min(p2.y) && p.y <= p1.y.max(p2.y) && p.x <= p1.x.max(p2.x) {
            // p1.y != p2.y here since p.y lies strictly above one end
            let x_inters = (p.y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
            if p1.x == p2.x || p.x <= x_inters {
                inside = !inside;
            }
        }
        p1 = p2;
    }
    inside
}

#[cfg(test)]
impl DetectionZone {
    /// Monitored zone covering a whole frame with every rule enabled
    pub(crate) fn full_frame(width: f64, height: f64) -> Self {
        Self {
            name: "full_frame".to_string(),
            points: vec![
                Point::new(0.0, 0.0),
                Point::new(width, 0.0),
                Point::new(width, height),
                Point::new(0.0, height),
            ],
            zone_type: ZoneType::Monitored,
            activity_types: ActivityType::ALL.into_iter().collect(),
        }
    }
}
