use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mot::RegionMark;
use crate::utils::Rect;

const UNKNOWN: &str = "unknown";

/// How far over the threshold a violation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Up to 10% over
    Mild,
    /// Up to 25% over
    Moderate,
    Severe,
}

impl Severity {
    pub fn classify(speed_kmh: f64, threshold_kmh: f64) -> Self {
        if speed_kmh <= threshold_kmh * 1.1 {
            Severity::Mild
        } else if speed_kmh <= threshold_kmh * 1.25 {
            Severity::Moderate
        } else {
            Severity::Severe
        }
    }
}

/// Vehicle details returned by the analysis service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub model: String,
    pub color: String,
    pub company: String,
    pub number_plate: String,
}

impl Default for VehicleInfo {
    fn default() -> Self {
        VehicleInfo {
            model: UNKNOWN.to_string(),
            color: UNKNOWN.to_string(),
            company: UNKNOWN.to_string(),
            number_plate: String::new(),
        }
    }
}

impl VehicleInfo {
    /// Lowercases descriptive fields, uppercases the plate and strips its spaces.
    /// Empty descriptive fields become "unknown".
    pub fn normalized(self) -> Self {
        let field = |s: String| {
            let s = s.trim().to_lowercase();
            if s.is_empty() {
                UNKNOWN.to_string()
            } else {
                s
            }
        };
        VehicleInfo {
            model: field(self.model),
            color: field(self.color),
            company: field(self.company),
            number_plate: self
                .number_plate
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
        }
    }

    /// Parses the first data row of a markdown table
    /// `| Model | Color | Company | Plate |`. Header and separator rows are skipped.
    pub fn parse_table(text: &str) -> Option<Self> {
        text.lines()
            .map(str::trim)
            .filter(|row| row.contains('|') && !row.contains("---"))
            .filter(|row| !row.to_lowercase().contains("vehicle model"))
            .find_map(|row| {
                let cells: Vec<&str> = row.trim_matches('|').split('|').collect();
                if cells.len() < 4 {
                    return None;
                }
                Some(
                    VehicleInfo {
                        model: cells[0].to_string(),
                        color: cells[1].to_string(),
                        company: cells[2].to_string(),
                        number_plate: cells[3].to_string(),
                    }
                    .normalized(),
                )
            })
    }
}

/// Result of the enrichment step attached to a violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnrichmentOutcome {
    /// Not processed yet
    Pending,
    /// No analysis service configured
    Disabled,
    Enriched { info: VehicleInfo, attempts: u32 },
    Failed { reason: String, attempts: u32 },
}

/// Payload submitted to the analysis service
#[derive(Debug, Clone)]
pub struct Evidence {
    pub violation_id: Uuid,
    pub track_id: u64,
    pub class_label: String,
    pub speed_kmh: f64,
    pub captured_at: DateTime<Utc>,
    /// JPEG-encoded crop of the vehicle
    pub jpeg: Option<Vec<u8>>,
}

/// Persisted record of a vehicle exceeding the speed threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub id: Uuid,
    pub stream_id: String,
    pub track_id: u64,
    pub class_label: String,
    pub speed_kmh: f64,
    pub threshold_kmh: f64,
    pub severity: Severity,
    pub entry: RegionMark,
    pub exit: RegionMark,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Native box of the vehicle on the frame the violation was detected
    pub bbox: Rect,
    pub crop_path: Option<PathBuf>,
    pub enrichment: EnrichmentOutcome,
}

impl Violation {
    pub fn attach_enrichment(&mut self, outcome: EnrichmentOutcome) {
        self.enrichment = outcome;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity() {
        assert_eq!(Severity::classify(43.0, 40.0), Severity::Mild);
        assert_eq!(Severity::classify(48.0, 40.0), Severity::Moderate);
        assert_eq!(Severity::classify(60.0, 40.0), Severity::Severe);
    }

    #[test]
    fn test_parse_table() {
        let text = "| Vehicle Model | Color | Company | Number Plate |\n\
                    |--------------|--------|---------|--------------|\n\
                    | Corolla | White | Toyota | abc 1234 |";
        let info = VehicleInfo::parse_table(text).unwrap();
        assert_eq!(info.model, "corolla");
        assert_eq!(info.color, "white");
        assert_eq!(info.company, "toyota");
        assert_eq!(info.number_plate, "ABC1234");

        let partial = VehicleInfo::parse_table("| Hilux |  | Toyota | |").unwrap();
        assert_eq!(partial.color, "unknown");
        assert_eq!(partial.number_plate, "");

        assert!(VehicleInfo::parse_table("no table here").is_none());
    }
}
