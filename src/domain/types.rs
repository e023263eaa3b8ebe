//! Shared types for crossing detection

use crate::domain::error::VisionError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Newtype wrapper for tracker identities to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Box corners as (x_left, y_top, x_right, y_bottom)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xyxy {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Xyxy {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y2
    }
}

/// One tracked detection in one frame, after shape validation
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub track_id: TrackId,
    pub class_id: i64,
    pub confidence: f64,
    /// Frame-relative coordinates in [0, 1]
    pub xyxyn: Xyxy,
    /// Absolute pixel coordinates in the tracker's frame
    pub xyxy: Xyxy,
}

/// Detection as delivered by an external tracker
///
/// Fields are kept as raw JSON so one badly typed box never rejects the
/// rest of its frame. Trackers omit the identity for boxes they have not yet
/// assigned to a track, and some emit integral floats (`4.0`) for ids and
/// classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyxyn: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xyxy: Option<Value>,
}

fn missing(field: &str) -> VisionError {
    VisionError::DetectionShape(format!("missing {field}"))
}

fn number(value: Option<&Value>, field: &str) -> Result<f64, VisionError> {
    let value = value.ok_or_else(|| missing(field))?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| VisionError::DetectionShape(format!("{field} is not a number: {value}")))
}

fn integral(value: Option<&Value>, field: &str) -> Result<i64, VisionError> {
    if let Some(v) = value.and_then(Value::as_i64) {
        return Ok(v);
    }
    let v = number(value, field)?;
    if v.fract() != 0.0 || v.abs() > i64::MAX as f64 {
        return Err(VisionError::DetectionShape(format!("{field} is not integral: {v}")));
    }
    Ok(v as i64)
}

fn corners(value: Option<&Value>, field: &str) -> Result<Xyxy, VisionError> {
    let value = value.ok_or_else(|| missing(field))?;
    let items = value
        .as_array()
        .ok_or_else(|| VisionError::DetectionShape(format!("{field} is not a list: {value}")))?;
    if items.len() != 4 {
        return Err(VisionError::DetectionShape(format!(
            "{field} must have 4 values, got {}",
            items.len()
        )));
    }
    let mut xs = [0.0; 4];
    for (slot, item) in xs.iter_mut().zip(items) {
        *slot = number(Some(item), field)?;
    }
    Ok(Xyxy::new(xs[0], xs[1], xs[2], xs[3]))
}

impl RawDetection {
    /// Validate the wire shape into a usable detection
    pub fn validate(&self) -> Result<DetectionBox, VisionError> {
        let id = integral(self.id.as_ref(), "track id")?;
        let track_id = u64::try_from(id)
            .map(TrackId)
            .map_err(|_| VisionError::DetectionShape(format!("negative track id {id}")))?;
        let class_id = integral(self.cls.as_ref(), "class")?;
        let confidence = number(self.conf.as_ref(), "confidence")?;
        let xyxyn = corners(self.xyxyn.as_ref(), "xyxyn")?;
        let xyxy = corners(self.xyxy.as_ref(), "xyxy")?;

        Ok(DetectionBox { track_id, class_id, confidence, xyxyn, xyxy })
    }
}

/// Boxes decode one by one; an entry that is not an object becomes an empty
/// detection and fails validation on its own
fn lenient_boxes<'de, D>(deserializer: D) -> Result<Vec<RawDetection>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(values.into_iter().map(|v| serde_json::from_value(v).unwrap_or_default()).collect())
}

/// Tracker output for a single frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// 1-based frame number as reported by the tracker; 0 when unknown
    #[serde(default)]
    pub frame: u64,
    #[serde(default, deserialize_with = "lenient_boxes")]
    pub boxes: Vec<RawDetection>,
    /// End-of-stream marker for push-based sources
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub eos: bool,
}

/// Trigger line in normalized frame coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerLine {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl TriggerLine {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, VisionError> {
        if x1 == x2 {
            return Err(VisionError::Configuration(format!(
                "TRIGGER_LINE_XYXYN must not be vertical (x1 == x2 == {x1})"
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Slope of the line in normalized coordinates
    #[inline]
    pub fn slope(&self) -> f64 {
        (self.y2 - self.y1) / (self.x2 - self.x1)
    }
}

impl FromStr for TriggerLine {
    type Err = VisionError;

    /// Parse `x1:y1:x2:y2`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(':')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                VisionError::Configuration(format!("error reading TRIGGER_LINE_XYXYN {s:?}: {e}"))
            })?;

        match values.as_slice() {
            [x1, y1, x2, y2] => Self::new(*x1, *y1, *x2, *y2),
            _ => Err(VisionError::Configuration(format!(
                "TRIGGER_LINE_XYXYN must have 4 numbers, colon-separated. {s}"
            ))),
        }
    }
}

impl std::fmt::Display for TriggerLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}, {:?}, {:?}, {:?}]", self.x1, self.y1, self.x2, self.y2)
    }
}

/// Position of a detection relative to the trigger line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Not facing the line, or not yet within 80% of it
    Far,
    Near80,
    Near90,
    Crossed,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Far => "far",
            Band::Near80 => "80",
            Band::Near90 => "90",
            Band::Crossed => "100",
        }
    }
}

/// How an analysis run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Stream exhausted
    Completed,
    /// Stop flag observed between frames
    Stopped,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "analysis complete",
            RunOutcome::Stopped => "terminated on stop command",
        }
    }
}

/// Race event the service is working on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: String,
}

impl RaceEvent {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }
}
