//! Run data model: descriptor, steps and the metadata document derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Position of the polarization filter slider.
///
/// Scripts refer to positions by the literal codes `"1"` to `"4"`; nothing else
/// is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FilterCode {
    /// Slider position 1
    One,
    /// Slider position 2
    Two,
    /// Slider position 3
    Three,
    /// Slider position 4
    Four,
}

impl FilterCode {
    /// All codes in slider order.
    pub const ALL: [FilterCode; 4] = [
        FilterCode::One,
        FilterCode::Two,
        FilterCode::Three,
        FilterCode::Four,
    ];

    /// Script literal for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterCode::One => "1",
            FilterCode::Two => "2",
            FilterCode::Three => "3",
            FilterCode::Four => "4",
        }
    }

    /// Slider position (1-based) the code selects.
    pub fn position(&self) -> u8 {
        match self {
            FilterCode::One => 1,
            FilterCode::Two => 2,
            FilterCode::Three => 3,
            FilterCode::Four => 4,
        }
    }
}

impl fmt::Display for FilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Literal that is not one of the four filter codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFilterCode(pub String);

impl fmt::Display for UnknownFilterCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown filter code '{}'", self.0)
    }
}

impl std::error::Error for UnknownFilterCode {}

impl FromStr for FilterCode {
    type Err = UnknownFilterCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1" => Ok(FilterCode::One),
            "2" => Ok(FilterCode::Two),
            "3" => Ok(FilterCode::Three),
            "4" => Ok(FilterCode::Four),
            other => Err(UnknownFilterCode(other.to_string())),
        }
    }
}

impl TryFrom<String> for FilterCode {
    type Error = UnknownFilterCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FilterCode> for String {
    fn from(value: FilterCode) -> Self {
        value.as_str().to_string()
    }
}

/// Validated header of an acquisition run.
///
/// Produced by the script parser and never mutated afterwards. Header keys
/// outside the fixed field set land in `metadata`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Project name
    pub project: String,
    /// Experiment name
    pub experiment: String,
    /// Archive path, relative to the data root unless absolute
    pub path: String,
    /// Acquisition date as written in the script
    pub date: String,
    /// Operator name
    pub operator: String,
    /// Free-form header entries
    pub metadata: BTreeMap<String, String>,
    /// Declared number of steps
    pub num_steps: usize,
}

/// One instrument configuration plus capture instruction.
///
/// Serialized field names match the keys downstream analysis tooling reads
/// from `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based step number as written in the script
    #[serde(rename = "step")]
    pub index: u32,
    /// Camera integration time in milliseconds
    #[serde(rename = "t_int")]
    pub integration_ms: f64,
    /// Camera gain
    pub gain: f64,
    /// Focus stage z-position in mm (recorded, not applied)
    #[serde(rename = "z_pos")]
    pub z_position_mm: f64,
    /// Tunable filter wavelength in nm
    #[serde(rename = "lam")]
    pub wavelength_nm: f64,
    /// Analyzer rotator (A) angle in degrees
    #[serde(rename = "phi_a")]
    pub angle_a_deg: f64,
    /// Generator rotator (G) angle in degrees
    #[serde(rename = "phi_g")]
    pub angle_g_deg: f64,
    /// Filter slider code
    #[serde(rename = "flt_a")]
    pub filter: FilterCode,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step(step={}, t_int={}, gain={}, z_pos={}, lam={}, phi_a={}, phi_g={}, flt_a='{}')",
            self.index,
            self.integration_ms,
            self.gain,
            self.z_position_mm,
            self.wavelength_nm,
            self.angle_a_deg,
            self.angle_g_deg,
            self.filter
        )
    }
}

/// Parse result: descriptor plus the ordered step list.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionScript {
    /// Opaque `VERSION` token, if the script declared one
    pub version: Option<String>,
    /// Validated header
    pub descriptor: Descriptor,
    /// Steps in script order
    pub steps: Vec<Step>,
}

/// Document stored at the archive's metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run identifier
    pub run_id: Uuid,
    /// Script `VERSION` token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Full descriptor, flattened to top-level keys
    #[serde(flatten)]
    pub descriptor: Descriptor,
    /// Every step of the run, in order
    pub steps: Vec<Step>,
    /// When the document was written
    pub written_at: DateTime<Utc>,
}

impl RunMetadata {
    /// Build the document for a run about to start.
    pub fn new(run_id: Uuid, script: &AcquisitionScript) -> Self {
        Self {
            run_id,
            version: script.version.clone(),
            descriptor: script.descriptor.clone(),
            steps: script.steps.clone(),
            written_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_step() -> Step {
        Step {
            index: 1,
            integration_ms: 12.5,
            gain: 1.0,
            z_position_mm: 0.0,
            wavelength_nm: 550.0,
            angle_a_deg: 0.0,
            angle_g_deg: 45.0,
            filter: FilterCode::Two,
        }
    }

    #[test]
    fn filter_code_accepts_only_four_literals() {
        for code in FilterCode::ALL {
            assert_eq!(code.as_str().parse::<FilterCode>().unwrap(), code);
        }
        assert!("0".parse::<FilterCode>().is_err());
        assert!("5".parse::<FilterCode>().is_err());
        assert!(" 1".parse::<FilterCode>().is_err());
        assert!("1.0".parse::<FilterCode>().is_err());
    }

    #[test]
    fn step_serializes_with_archive_keys() {
        let json = serde_json::to_value(sample_step()).unwrap();
        assert_eq!(json["step"], 1);
        assert_eq!(json["t_int"], 12.5);
        assert_eq!(json["lam"], 550.0);
        assert_eq!(json["phi_g"], 45.0);
        assert_eq!(json["flt_a"], "2");
    }

    #[test]
    fn metadata_document_flattens_descriptor() {
        let script = AcquisitionScript {
            version: Some("1.0".into()),
            descriptor: Descriptor {
                project: "P1".into(),
                experiment: "E1".into(),
                path: "out/run1.zip".into(),
                date: "2024-01-01".into(),
                operator: "A".into(),
                metadata: BTreeMap::from([("sample".to_string(), "quartz".to_string())]),
                num_steps: 1,
            },
            steps: vec![sample_step()],
        };
        let doc = RunMetadata::new(Uuid::new_v4(), &script);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["project"], "P1");
        assert_eq!(json["num_steps"], 1);
        assert_eq!(json["metadata"]["sample"], "quartz");
        assert_eq!(json["steps"].as_array().unwrap().len(), 1);

        let back: RunMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn step_display_lists_every_field() {
        let text = sample_step().to_string();
        for key in ["step=1", "t_int=12.5", "lam=550", "phi_a=0", "phi_g=45", "flt_a='2'"] {
            assert!(text.contains(key), "missing {key} in {text}");
        }
    }
}
